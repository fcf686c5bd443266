use std::fmt;

/// Concrete JVM type of a value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
    /// Class or interface, by internal name (`java/lang/String`).
    Object(String),
    Array(Box<JType>),
}

/// Operand-stack category of a type, selecting the load/store/return opcode family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Int,
    Long,
    Float,
    Double,
    Reference,
    Void,
}

impl JType {
    pub fn object(name: impl Into<String>) -> Self {
        JType::Object(name.into())
    }

    pub fn java_lang_object() -> Self {
        JType::object("java/lang/Object")
    }

    pub fn array_of(element: JType) -> Self {
        JType::Array(Box::new(element))
    }

    /// Field descriptor form (`I`, `Ljava/lang/String;`, `[J`).
    pub fn descriptor(&self) -> String {
        match self {
            JType::Boolean => "Z".to_string(),
            JType::Byte => "B".to_string(),
            JType::Char => "C".to_string(),
            JType::Short => "S".to_string(),
            JType::Int => "I".to_string(),
            JType::Long => "J".to_string(),
            JType::Float => "F".to_string(),
            JType::Double => "D".to_string(),
            JType::Void => "V".to_string(),
            JType::Object(name) => format!("L{name};"),
            JType::Array(element) => format!("[{}", element.descriptor()),
        }
    }

    /// Name used in a `CONSTANT_Class` entry: internal name for classes, descriptor for arrays.
    pub fn internal_name(&self) -> String {
        match self {
            JType::Object(name) => name.clone(),
            other => other.descriptor(),
        }
    }

    /// Number of local/stack slots the type occupies.
    pub fn size(&self) -> u16 {
        match self {
            JType::Void => 0,
            JType::Long | JType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_wide(&self) -> bool {
        self.size() == 2
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, JType::Object(_) | JType::Array(_))
    }

    /// Types carried as `int` on the operand stack.
    pub fn is_int_like(&self) -> bool {
        matches!(
            self,
            JType::Boolean | JType::Byte | JType::Char | JType::Short | JType::Int
        )
    }

    pub fn category(&self) -> Category {
        match self {
            JType::Long => Category::Long,
            JType::Float => Category::Float,
            JType::Double => Category::Double,
            JType::Void => Category::Void,
            JType::Object(_) | JType::Array(_) => Category::Reference,
            _ => Category::Int,
        }
    }

    pub fn element(&self) -> Option<&JType> {
        match self {
            JType::Array(element) => Some(element),
            _ => None,
        }
    }

    /// Number of array dimensions and the innermost element type.
    pub fn dimensions(&self) -> (usize, &JType) {
        let mut depth = 0;
        let mut current = self;
        while let JType::Array(element) = current {
            depth += 1;
            current = element;
        }
        (depth, current)
    }
}

impl fmt::Display for JType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JType::Boolean => f.write_str("boolean"),
            JType::Byte => f.write_str("byte"),
            JType::Char => f.write_str("char"),
            JType::Short => f.write_str("short"),
            JType::Int => f.write_str("int"),
            JType::Long => f.write_str("long"),
            JType::Float => f.write_str("float"),
            JType::Double => f.write_str("double"),
            JType::Void => f.write_str("void"),
            JType::Object(name) => f.write_str(&name.replace('/', ".")),
            JType::Array(element) => write!(f, "{element}[]"),
        }
    }
}

/// Partial knowledge about a local's type, refined by type assignment.
///
/// `Unknown` sits at the bottom. `Single` is any one-slot value, `Prim` a one-slot
/// primitive, `Wide` a two-slot primitive and `Ref` any reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeHint {
    Unknown,
    Single,
    Prim,
    Wide,
    Ref,
    Exact(JType),
}

impl TypeHint {
    pub fn exact(&self) -> Option<&JType> {
        match self {
            TypeHint::Exact(ty) => Some(ty),
            _ => None,
        }
    }

    /// Least upper bound of two hints, `None` when they cannot describe one value.
    pub fn merge(&self, other: &TypeHint) -> Option<TypeHint> {
        use TypeHint::*;
        match (self, other) {
            (Unknown, x) | (x, Unknown) => Some(x.clone()),
            (Exact(a), Exact(b)) => merge_exact(a, b).map(Exact),
            (Exact(t), hint) | (hint, Exact(t)) => hint.accepts(t).then(|| Exact(t.clone())),
            (a, b) if a == b => Some(a.clone()),
            (Single, Prim) | (Prim, Single) => Some(Prim),
            (Single, Ref) | (Ref, Single) => Some(Ref),
            _ => None,
        }
    }

    fn accepts(&self, ty: &JType) -> bool {
        match self {
            TypeHint::Unknown => true,
            TypeHint::Single => ty.size() == 1,
            TypeHint::Prim => ty.is_int_like() || *ty == JType::Float,
            TypeHint::Wide => ty.is_wide(),
            TypeHint::Ref => ty.is_reference(),
            TypeHint::Exact(exact) => merge_exact(exact, ty).is_some(),
        }
    }

    /// Concrete type chosen when nothing more specific is known.
    pub fn resolve(&self) -> JType {
        match self {
            TypeHint::Unknown | TypeHint::Single | TypeHint::Prim => JType::Int,
            TypeHint::Wide => JType::Long,
            TypeHint::Ref => JType::java_lang_object(),
            TypeHint::Exact(ty) => ty.clone(),
        }
    }
}

fn merge_exact(a: &JType, b: &JType) -> Option<JType> {
    if a == b {
        return Some(a.clone());
    }
    if a.is_int_like() && b.is_int_like() {
        return Some(merge_int_like(a, b));
    }
    match (a, b) {
        (JType::Array(x), JType::Array(y)) => merge_exact(x, y)
            .filter(|_| x == y || (x.is_reference() && y.is_reference()))
            .map(JType::array_of),
        (JType::Array(_), JType::Object(_)) => Some(a.clone()),
        (JType::Object(_), JType::Array(_)) => Some(b.clone()),
        (JType::Object(_), JType::Object(_)) => Some(JType::java_lang_object()),
        _ => None,
    }
}

fn merge_int_like(a: &JType, b: &JType) -> JType {
    let rank = |ty: &JType| match ty {
        JType::Boolean => 0,
        JType::Byte => 1,
        JType::Short | JType::Char => 2,
        _ => 3,
    };
    match (a, b) {
        (JType::Char, JType::Short | JType::Byte) | (JType::Short | JType::Byte, JType::Char) => {
            JType::Int
        }
        _ if rank(a) >= rank(b) => a.clone(),
        _ => b.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_round_out_arrays_and_objects() {
        let ty = JType::array_of(JType::array_of(JType::object("java/lang/String")));
        assert_eq!(ty.descriptor(), "[[Ljava/lang/String;");
        assert_eq!(ty.internal_name(), "[[Ljava/lang/String;");
        assert_eq!(ty.dimensions().0, 2);
        assert_eq!(JType::object("a/B").internal_name(), "a/B");
    }

    #[test]
    fn hints_merge_along_the_lattice() {
        let single = TypeHint::Single;
        assert_eq!(single.merge(&TypeHint::Prim), Some(TypeHint::Prim));
        assert_eq!(
            TypeHint::Prim.merge(&TypeHint::Exact(JType::Float)),
            Some(TypeHint::Exact(JType::Float))
        );
        assert_eq!(single.merge(&TypeHint::Wide), None);
        assert_eq!(TypeHint::Prim.merge(&TypeHint::Ref), None);
        assert_eq!(
            TypeHint::Exact(JType::Int).merge(&TypeHint::Exact(JType::Float)),
            None
        );
    }

    #[test]
    fn narrow_integers_widen_when_merged() {
        let merged = TypeHint::Exact(JType::Boolean).merge(&TypeHint::Exact(JType::Int));
        assert_eq!(merged, Some(TypeHint::Exact(JType::Int)));
        let merged = TypeHint::Exact(JType::Char).merge(&TypeHint::Exact(JType::Short));
        assert_eq!(merged, Some(TypeHint::Exact(JType::Int)));
    }

    #[test]
    fn arrays_win_over_plain_objects() {
        let array = JType::array_of(JType::Int);
        let merged = TypeHint::Exact(JType::java_lang_object()).merge(&TypeHint::Exact(array.clone()));
        assert_eq!(merged, Some(TypeHint::Exact(array)));
        assert_eq!(
            TypeHint::Exact(JType::array_of(JType::Int))
                .merge(&TypeHint::Exact(JType::array_of(JType::Float))),
            None
        );
    }
}
