//! Static field metadata for model types.
//!
//! A model declares, once, which of its fields take part in which CRUD
//! operation. Everything else in the crate reads that declaration through
//! [`describe`].

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::value::Value;

/// Storage role of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Server generated; read back but never written.
    Identity,
    /// Invisible to every generated statement and to row mapping.
    Excluded,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }

    /// Populated from result rows.
    pub fn is_mapped(&self) -> bool {
        self.kind != FieldKind::Excluded
    }

    /// Part of INSERT and UPDATE value lists.
    pub fn is_writable(&self) -> bool {
        self.kind == FieldKind::Normal
    }
}

/// A fixed-shape record mapped to one table row.
///
/// Usually implemented through [`model!`](crate::model!).
pub trait Model: Default + 'static {
    /// Field descriptors in declaration order.
    fn fields() -> Vec<FieldDescriptor>;

    /// Current value of a non-excluded field; `None` for excluded or unknown names.
    fn value_of(&self, field: &str) -> Option<Value>;

    /// Converts `value` into the named field and stores it.
    ///
    /// Returns `Ok(false)` when the name is excluded or unknown.
    fn assign(&mut self, field: &str, value: &Value) -> Result<bool, String>;
}

type DescriptorCache = RwLock<HashMap<TypeId, Arc<[FieldDescriptor]>>>;

fn cache() -> &'static DescriptorCache {
    static CACHE: OnceLock<DescriptorCache> = OnceLock::new();
    CACHE.get_or_init(DescriptorCache::default)
}

/// Returns the ordered field descriptors of `T`, computing them at most once
/// per type under normal operation.
///
/// Racing first calls for the same type may each compute the list; the
/// entries are equal so whichever lands last wins harmlessly.
pub fn describe<T: Model>() -> Arc<[FieldDescriptor]> {
    let key = TypeId::of::<T>();

    if let Ok(guard) = cache().read() {
        if let Some(fields) = guard.get(&key) {
            return Arc::clone(fields);
        }
    }

    let fields: Arc<[FieldDescriptor]> = T::fields().into();
    if let Ok(mut guard) = cache().write() {
        guard.insert(key, Arc::clone(&fields));
    }
    tracing::trace!(
        model = std::any::type_name::<T>(),
        field_count = fields.len(),
        "described model"
    );
    fields
}

/// Declares a model struct together with its [`Model`] implementation.
///
/// Fields may carry one marker: `#[identity]` for server generated columns or
/// `#[excluded]` for fields that never reach the database. Doc comments are
/// kept; any other field attribute is rejected.
///
/// ```ignore
/// model! {
///     #[derive(Debug, Clone, Default, PartialEq)]
///     pub struct Person {
///         #[identity]
///         pub id: i64,
///         /// Full display name.
///         pub name: String,
///         #[excluded]
///         pub nickname: String,
///     }
/// }
/// ```
#[macro_export]
macro_rules! model {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$attr:ident $(= $doc:literal)?])*
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $($(#[$attr = $doc])?)*
                $field_vis $field : $ty
            ),*
        }

        impl $crate::Model for $name {
            fn fields() -> ::std::vec::Vec<$crate::FieldDescriptor> {
                ::std::vec![
                    $(
                        $crate::FieldDescriptor::new(
                            stringify!($field),
                            $crate::__field_kind!($($attr)*),
                        )
                    ),*
                ]
            }

            fn value_of(&self, field: &str) -> ::std::option::Option<$crate::Value> {
                $(
                    if field == stringify!($field) {
                        return $crate::__field_value!($($attr)* ; self.$field);
                    }
                )*
                ::std::option::Option::None
            }

            fn assign(
                &mut self,
                field: &str,
                value: &$crate::Value,
            ) -> ::std::result::Result<bool, ::std::string::String> {
                $(
                    if field == stringify!($field) {
                        return $crate::__field_assign!($($attr)* ; self.$field, $ty, value);
                    }
                )*
                ::std::result::Result::Ok(false)
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __field_kind {
    () => {
        $crate::FieldKind::Normal
    };
    (doc $($rest:ident)*) => {
        $crate::__field_kind!($($rest)*)
    };
    (identity $($rest:ident)*) => {
        $crate::FieldKind::Identity
    };
    (excluded $($rest:ident)*) => {
        $crate::FieldKind::Excluded
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __field_value {
    (excluded $($rest:ident)* ; $place:expr) => {
        ::std::option::Option::None
    };
    ($skip:ident $($rest:ident)* ; $place:expr) => {
        $crate::__field_value!($($rest)* ; $place)
    };
    (; $place:expr) => {
        ::std::option::Option::Some($crate::Value::from(::std::clone::Clone::clone(&$place)))
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __field_assign {
    (excluded $($rest:ident)* ; $place:expr, $ty:ty, $value:expr) => {
        ::std::result::Result::Ok(false)
    };
    ($skip:ident $($rest:ident)* ; $place:expr, $ty:ty, $value:expr) => {
        $crate::__field_assign!($($rest)* ; $place, $ty, $value)
    };
    (; $place:expr, $ty:ty, $value:expr) => {
        <$ty as $crate::FromValue>::from_value($value).map(|converted| {
            $place = converted;
            true
        })
    };
}
