use crate::symbol::SymbolUrl;
use std::fmt;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommonError {
    InvalidLocation(String),
    EmptyTypeSet,
    InvalidUnionMember(TypeDef),
    InvalidIntersectionMember(TypeDef),
    PlaceholderOutOfBounds { index: u8, num_arguments: usize },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CommonError::InvalidLocation(path) => {
                write!(f, "invalid module location: \"{}\"", path)
            }
            CommonError::EmptyTypeSet => {
                write!(f, "union or intersection must have at least one member")
            }
            CommonError::InvalidUnionMember(member) => {
                write!(f, "type {} cannot be a union member", member)
            }
            CommonError::InvalidIntersectionMember(member) => {
                write!(f, "type {} cannot be an intersection member", member)
            }
            CommonError::PlaceholderOutOfBounds { index, num_arguments } => {
                write!(
                    f,
                    "placeholder index {} out of bounds for {} type arguments",
                    index, num_arguments
                )
            }
        }
    }
}

pub type CommonResult<T> = Result<T, CommonError>;

/// Canonical structural type value. Two TypeDefs built independently from the
/// same inputs always compare equal, which lets the runtime use equality as
/// an identity proxy when building dispatch tables and comparing types.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TypeDef {
    Concrete {
        symbol: SymbolUrl,
        arguments: Vec<TypeDef>,
    },
    Placeholder {
        index: u8,
        template: SymbolUrl,
        arguments: Vec<TypeDef>,
    },
    Union {
        members: Vec<TypeDef>,
    },
    Intersection {
        members: Vec<TypeDef>,
    },
    NoReturn,
}

impl TypeDef {
    pub fn concrete(symbol: SymbolUrl, arguments: Vec<TypeDef>) -> Self {
        TypeDef::Concrete { symbol, arguments }
    }

    pub fn placeholder(index: u8, template: SymbolUrl, arguments: Vec<TypeDef>) -> Self {
        TypeDef::Placeholder {
            index,
            template,
            arguments,
        }
    }

    /// Build a union type. Nested unions are flattened, members are
    /// deduplicated and sorted into canonical order, so independently built
    /// unions over the same member set compare equal.
    pub fn for_union(members: Vec<TypeDef>) -> CommonResult<Self> {
        let mut flat = Vec::with_capacity(members.len());
        Self::flatten_union(members, &mut flat)?;

        if flat.is_empty() {
            return Err(CommonError::EmptyTypeSet);
        }

        flat.sort();
        flat.dedup();

        Ok(TypeDef::Union { members: flat })
    }

    fn flatten_union(members: Vec<TypeDef>, out: &mut Vec<TypeDef>) -> CommonResult<()> {
        for member in members {
            match member {
                TypeDef::Union { members } => Self::flatten_union(members, out)?,
                member @ TypeDef::Concrete { .. }
                | member @ TypeDef::Placeholder { .. }
                | member @ TypeDef::Intersection { .. } => out.push(member),
                member => return Err(CommonError::InvalidUnionMember(member)),
            }
        }
        Ok(())
    }

    /// Build an intersection type. Members are deduplicated and sorted into
    /// canonical order; only concrete and placeholder types may intersect.
    pub fn for_intersection(members: Vec<TypeDef>) -> CommonResult<Self> {
        if members.is_empty() {
            return Err(CommonError::EmptyTypeSet);
        }

        for member in &members {
            match member {
                TypeDef::Concrete { .. } | TypeDef::Placeholder { .. } => {}
                member => {
                    return Err(CommonError::InvalidIntersectionMember(member.clone()));
                }
            }
        }

        let mut members = members;
        members.sort();
        members.dedup();

        Ok(TypeDef::Intersection { members })
    }

    /// Substitute placeholders belonging to `template` with the matching
    /// entry of `args`, rebuilding the type bottom-up. Placeholders owned by
    /// a different template pass through unchanged. Side-effect free: the
    /// receiver is never mutated and equal inputs produce equal outputs.
    pub fn substitute(&self, template: &SymbolUrl, args: &[TypeDef]) -> CommonResult<TypeDef> {
        match self {
            TypeDef::Concrete { symbol, arguments } => {
                let arguments = arguments
                    .iter()
                    .map(|arg| arg.substitute(template, args))
                    .collect::<CommonResult<Vec<_>>>()?;
                Ok(TypeDef::Concrete {
                    symbol: symbol.clone(),
                    arguments,
                })
            }

            TypeDef::Placeholder {
                index,
                template: owner,
                arguments,
            } => {
                if owner == template {
                    match args.get(usize::from(*index)) {
                        Some(arg) => Ok(arg.clone()),
                        None => Err(CommonError::PlaceholderOutOfBounds {
                            index: *index,
                            num_arguments: args.len(),
                        }),
                    }
                } else {
                    let arguments = arguments
                        .iter()
                        .map(|arg| arg.substitute(template, args))
                        .collect::<CommonResult<Vec<_>>>()?;
                    Ok(TypeDef::Placeholder {
                        index: *index,
                        template: owner.clone(),
                        arguments,
                    })
                }
            }

            TypeDef::Union { members } => {
                let members = members
                    .iter()
                    .map(|member| member.substitute(template, args))
                    .collect::<CommonResult<Vec<_>>>()?;
                TypeDef::for_union(members)
            }

            TypeDef::Intersection { members } => {
                let members = members
                    .iter()
                    .map(|member| member.substitute(template, args))
                    .collect::<CommonResult<Vec<_>>>()?;
                TypeDef::for_intersection(members)
            }

            TypeDef::NoReturn => Ok(TypeDef::NoReturn),
        }
    }
}

impl fmt::Display for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeDef::Concrete { symbol, arguments } => {
                write!(f, "{}", symbol)?;
                fmt_arguments(f, arguments)
            }
            TypeDef::Placeholder {
                index,
                template,
                arguments,
            } => {
                write!(f, "{}@{}", template, index)?;
                fmt_arguments(f, arguments)
            }
            TypeDef::Union { members } => fmt_members(f, members, " | "),
            TypeDef::Intersection { members } => fmt_members(f, members, " & "),
            TypeDef::NoReturn => write!(f, "noreturn"),
        }
    }
}

fn fmt_arguments(f: &mut fmt::Formatter, arguments: &[TypeDef]) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }

    write!(f, "[")?;
    for (i, arg) in arguments.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    write!(f, "]")
}

fn fmt_members(f: &mut fmt::Formatter, members: &[TypeDef], sep: &str) -> fmt::Result {
    for (i, member) in members.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", member)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::location::ModuleLocation;
    use crate::symbol::SymbolPath;

    fn url(location: &str, name: &str) -> SymbolUrl {
        SymbolUrl::new(
            ModuleLocation::new(location),
            SymbolPath::from_parts(&[name]),
        )
    }

    fn concrete(name: &str) -> TypeDef {
        TypeDef::concrete(url("/test/types", name), Vec::new())
    }

    #[test]
    fn structural_equality_of_independent_values() {
        let a = TypeDef::concrete(url("/m", "List"), vec![concrete("Int")]);
        let b = TypeDef::concrete(url("/m", "List"), vec![concrete("Int")]);
        assert_eq!(a, b);
    }

    #[test]
    fn union_members_are_canonically_ordered() {
        let a = TypeDef::for_union(vec![concrete("A"), concrete("B")]).unwrap();
        let b = TypeDef::for_union(vec![concrete("B"), concrete("A")]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn nested_unions_flatten_and_dedup() {
        let inner = TypeDef::for_union(vec![concrete("A"), concrete("B")]).unwrap();
        let outer = TypeDef::for_union(vec![inner, concrete("B"), concrete("C")]).unwrap();

        match &outer {
            TypeDef::Union { members } => assert_eq!(members.len(), 3),
            other => panic!("expected union, got {}", other),
        }
    }

    #[test]
    fn union_rejects_noreturn_member() {
        let result = TypeDef::for_union(vec![concrete("A"), TypeDef::NoReturn]);
        assert!(matches!(result, Err(CommonError::InvalidUnionMember(..))));
    }

    #[test]
    fn intersection_rejects_union_member() {
        let member = TypeDef::for_union(vec![concrete("A"), concrete("B")]).unwrap();
        let result = TypeDef::for_intersection(vec![member]);
        assert!(matches!(
            result,
            Err(CommonError::InvalidIntersectionMember(..))
        ));
    }

    #[test]
    fn substitution_is_deterministic() {
        let template = url("/m", "Pair");
        let def = TypeDef::concrete(
            url("/m", "Pair"),
            vec![
                TypeDef::placeholder(0, template.clone(), Vec::new()),
                TypeDef::placeholder(1, template.clone(), Vec::new()),
            ],
        );
        let args = [concrete("Int"), concrete("Bool")];

        let once = def.substitute(&template, &args).unwrap();
        let twice = def.substitute(&template, &args).unwrap();

        assert_eq!(once, twice);
        assert_eq!(
            once,
            TypeDef::concrete(url("/m", "Pair"), vec![concrete("Int"), concrete("Bool")])
        );
    }

    #[test]
    fn substitution_index_out_of_bounds_is_an_error() {
        let template = url("/m", "Box");
        let def = TypeDef::placeholder(3, template.clone(), Vec::new());

        let result = def.substitute(&template, &[concrete("Int")]);
        assert_eq!(
            result,
            Err(CommonError::PlaceholderOutOfBounds {
                index: 3,
                num_arguments: 1,
            })
        );
    }

    #[test]
    fn foreign_placeholder_passes_through() {
        let ours = url("/m", "Box");
        let theirs = url("/m", "Other");
        let def = TypeDef::placeholder(0, theirs.clone(), Vec::new());

        let result = def.substitute(&ours, &[concrete("Int")]).unwrap();
        assert_eq!(result, TypeDef::placeholder(0, theirs, Vec::new()));
    }
}
