//! Move-semantics classification of resolved types.
//!
//! The registry is built once per compilation with [`TypeRegistryBuilder`]
//! and shared read-only (`&TypeRegistry`) by every function analysis, so it
//! may be handed to parallel workers without synchronisation.

use crate::compiler::ast::{TypeId, TypeRef};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// How values of a type behave on assignment / by-value passing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoveSemantics {
    /// Assignment duplicates the value; the source stays usable.
    Copy,
    /// Assignment transfers ownership; the source becomes unusable.
    Move,
    /// The value is pinned to its storage and may not be moved at all.
    NonMovable,
}

/// Registration record for one nominal type.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub semantics: MoveSemantics,
    /// Field name → field type, in declaration order. Empty for scalars.
    pub fields: IndexMap<String, TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("type `{0}` is registered twice")]
    DuplicateType(TypeId),
    #[error("type `{ty}` is marked Copy but field `{field}` is not Copy")]
    CopyWithMoveField { ty: TypeId, field: String },
}

const COPY_PRIMITIVES: &[&str] = &[
    "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64", "u128", "usize",
    "f32", "f64", "bool", "char", "()",
];

const MOVE_BUILTINS: &[&str] = &["String", "Vec", "Box"];

/// Immutable type classification table.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<TypeId, TypeInfo>,
}

impl TypeRegistry {
    /// Registry holding only the built-in types.
    pub fn with_builtins() -> Self {
        TypeRegistryBuilder::new().build()
    }

    /// Classification of a nominal type. Unregistered types are Move.
    pub fn classify(&self, ty: &TypeId) -> MoveSemantics {
        self.types
            .get(ty)
            .map(|info| info.semantics)
            .unwrap_or(MoveSemantics::Move)
    }

    /// Classification of an annotated type. Shared references are Copy,
    /// mutable references are Move (they are unique).
    pub fn classify_ref(&self, ty: &TypeRef) -> MoveSemantics {
        match ty {
            TypeRef::Named(id) => self.classify(id),
            TypeRef::Ref { mutable: false, .. } => MoveSemantics::Copy,
            TypeRef::Ref { mutable: true, .. } => MoveSemantics::Move,
        }
    }

    pub fn is_registered(&self, ty: &TypeId) -> bool {
        self.types.contains_key(ty)
    }

    pub fn info(&self, ty: &TypeId) -> Option<&TypeInfo> {
        self.types.get(ty)
    }

    /// Type of `field` on values of type `ty`, looking through references.
    pub fn field_type(&self, ty: &TypeRef, field: &str) -> Option<&TypeRef> {
        match ty.pointee() {
            TypeRef::Named(id) => self.types.get(id)?.fields.get(field),
            TypeRef::Ref { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Mutable phase of the registry. Populated from the type checker's
/// declarations, then frozen with [`TypeRegistryBuilder::build`].
#[derive(Debug, Clone)]
pub struct TypeRegistryBuilder {
    types: HashMap<TypeId, TypeInfo>,
}

impl Default for TypeRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistryBuilder {
    pub fn new() -> Self {
        let mut types = HashMap::new();
        for name in COPY_PRIMITIVES {
            types.insert(
                TypeId::from(*name),
                TypeInfo {
                    semantics: MoveSemantics::Copy,
                    fields: IndexMap::new(),
                },
            );
        }
        for name in MOVE_BUILTINS {
            types.insert(
                TypeId::from(*name),
                TypeInfo {
                    semantics: MoveSemantics::Move,
                    fields: IndexMap::new(),
                },
            );
        }
        Self { types }
    }

    /// Record an explicit classification for a scalar/opaque type.
    /// Re-registering a built-in overrides it; re-registering a user type is an error.
    pub fn register_type(
        &mut self,
        ty: impl Into<TypeId>,
        semantics: MoveSemantics,
    ) -> Result<&mut Self, RegistryError> {
        let ty = ty.into();
        if self.is_user_defined(&ty) {
            return Err(RegistryError::DuplicateType(ty));
        }
        self.types.insert(
            ty,
            TypeInfo {
                semantics,
                fields: IndexMap::new(),
            },
        );
        Ok(self)
    }

    /// Register an aggregate. Aggregates are Move unless `copy` is set, and a
    /// Copy aggregate may only contain Copy fields.
    pub fn register_struct(
        &mut self,
        ty: impl Into<TypeId>,
        fields: Vec<(String, TypeRef)>,
        copy: bool,
    ) -> Result<&mut Self, RegistryError> {
        let ty = ty.into();
        if self.types.contains_key(&ty) {
            return Err(RegistryError::DuplicateType(ty));
        }
        if copy {
            for (name, field_ty) in &fields {
                if self.classify_field(field_ty) != MoveSemantics::Copy {
                    return Err(RegistryError::CopyWithMoveField {
                        ty,
                        field: name.clone(),
                    });
                }
            }
        }
        let semantics = if copy {
            MoveSemantics::Copy
        } else {
            MoveSemantics::Move
        };
        self.types.insert(
            ty,
            TypeInfo {
                semantics,
                fields: fields.into_iter().collect(),
            },
        );
        Ok(self)
    }

    pub fn build(self) -> TypeRegistry {
        TypeRegistry { types: self.types }
    }

    fn classify_field(&self, ty: &TypeRef) -> MoveSemantics {
        match ty {
            TypeRef::Named(id) => self
                .types
                .get(id)
                .map(|i| i.semantics)
                .unwrap_or(MoveSemantics::Move),
            TypeRef::Ref { mutable, .. } => {
                if *mutable {
                    MoveSemantics::Move
                } else {
                    MoveSemantics::Copy
                }
            }
        }
    }

    fn is_user_defined(&self, ty: &TypeId) -> bool {
        self.types.contains_key(ty)
            && !COPY_PRIMITIVES.contains(&ty.as_str())
            && !MOVE_BUILTINS.contains(&ty.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_registry() -> TypeRegistry {
        let mut b = TypeRegistryBuilder::new();
        b.register_struct(
            "Point",
            vec![
                ("x".into(), TypeRef::named("i32")),
                ("y".into(), TypeRef::named("i32")),
            ],
            true,
        )
        .unwrap();
        b.register_struct(
            "Person",
            vec![
                ("name".into(), TypeRef::named("String")),
                ("age".into(), TypeRef::named("u32")),
            ],
            false,
        )
        .unwrap();
        b.build()
    }

    #[test]
    fn primitives_are_copy() {
        let r = TypeRegistry::with_builtins();
        for name in ["i32", "u8", "bool", "f64", "char", "()"] {
            assert_eq!(r.classify(&TypeId::from(name)), MoveSemantics::Copy, "{}", name);
        }
    }

    #[test]
    fn string_is_move() {
        let r = TypeRegistry::with_builtins();
        assert_eq!(r.classify(&TypeId::from("String")), MoveSemantics::Move);
    }

    #[test]
    fn unregistered_defaults_to_move() {
        let r = TypeRegistry::with_builtins();
        assert_eq!(r.classify(&TypeId::from("Mystery")), MoveSemantics::Move);
        assert!(!r.is_registered(&TypeId::from("Mystery")));
    }

    #[test]
    fn references_shared_copy_unique_move() {
        let r = TypeRegistry::with_builtins();
        let s = TypeRef::shared(TypeRef::named("String"));
        let m = TypeRef::unique(TypeRef::named("i32"));
        assert_eq!(r.classify_ref(&s), MoveSemantics::Copy);
        assert_eq!(r.classify_ref(&m), MoveSemantics::Move);
    }

    #[test]
    fn aggregates_default_move_unless_marked_copy() {
        let r = point_registry();
        assert_eq!(r.classify(&TypeId::from("Point")), MoveSemantics::Copy);
        assert_eq!(r.classify(&TypeId::from("Person")), MoveSemantics::Move);
    }

    #[test]
    fn copy_struct_rejects_move_field() {
        let mut b = TypeRegistryBuilder::new();
        let err = b
            .register_struct("Bad", vec![("s".into(), TypeRef::named("String"))], true)
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::CopyWithMoveField {
                ty: TypeId::from("Bad"),
                field: "s".into()
            }
        );
    }

    #[test]
    fn duplicate_user_type_rejected() {
        let mut b = TypeRegistryBuilder::new();
        b.register_type("Handle", MoveSemantics::NonMovable).unwrap();
        assert!(matches!(
            b.register_type("Handle", MoveSemantics::Copy),
            Err(RegistryError::DuplicateType(_))
        ));
    }

    #[test]
    fn builtin_may_be_overridden() {
        let mut b = TypeRegistryBuilder::new();
        b.register_type("String", MoveSemantics::Copy).unwrap();
        let r = b.build();
        assert_eq!(r.classify(&TypeId::from("String")), MoveSemantics::Copy);
    }

    #[test]
    fn field_types_look_through_references() {
        let r = point_registry();
        let by_ref = TypeRef::shared(TypeRef::named("Person"));
        assert_eq!(r.field_type(&by_ref, "name"), Some(&TypeRef::named("String")));
        assert_eq!(r.field_type(&by_ref, "missing"), None);
        assert_eq!(
            r.field_type(&TypeRef::named("Person"), "age"),
            Some(&TypeRef::named("u32"))
        );
    }

    #[test]
    fn registry_is_shareable_across_threads() {
        fn assert_sync<T: Sync + Send>() {}
        assert_sync::<TypeRegistry>();
    }
}
