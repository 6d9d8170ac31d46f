/// Typed accessors over a [`Model`](crate::Model).
///
/// Generates a wrapper struct with one getter and one `set_<field>` setter
/// per listed field. Getters convert lazily like [`Model::get`](crate::Model::get)
/// and return `None` for missing or null values; setters track changes like
/// [`Model::set`](crate::Model::set).
///
/// ```
/// use lux_odm::{Field, Model, ModelDef, ModelRegistry, typed_model};
///
/// typed_model! {
///     pub struct Person {
///         name: String,
///         age: i64,
///     }
/// }
///
/// let mut registry = ModelRegistry::new();
/// let meta = ModelDef::new("Person")
///     .field("name", Field::char())
///     .field("age", Field::integer())
///     .build(&mut registry)
///     .unwrap();
///
/// let mut person = Person::new(Model::new(meta, [("name", "Ann")]).unwrap()).unwrap();
/// person.set_age("31").unwrap();
/// assert_eq!(person.age().unwrap(), Some(31));
/// assert_eq!(person.name().unwrap().as_deref(), Some("Ann"));
/// assert!(person.model().is_modified("age"));
/// ```
#[macro_export]
macro_rules! typed_model {
    ($(#[$meta:meta])* $vis:vis struct $name:ident { $($field:ident : $field_ty:ty),* $(,)? }) => {
        $crate::paste::paste! {
            $(#[$meta])*
            #[derive(Debug)]
            $vis struct $name {
                inner: $crate::Model,
            }

            impl $name {
                /// Wraps `model`, failing when it lacks one of the listed fields.
                pub fn new(model: $crate::Model) -> $crate::Result<Self> {
                    $(
                        if model.meta().field(stringify!($field)).is_none()
                            && !$crate::model::field::is_primary_key_alias(stringify!($field))
                        {
                            return Err($crate::OdmError::field(format!(
                                "'{}' is not a field of '{}'",
                                stringify!($field),
                                model.meta().name()
                            )));
                        }
                    )*
                    Ok(Self { inner: model })
                }

                pub fn model(&self) -> &$crate::Model {
                    &self.inner
                }

                pub fn model_mut(&mut self) -> &mut $crate::Model {
                    &mut self.inner
                }

                pub fn into_model(self) -> $crate::Model {
                    self.inner
                }

                $(
                    pub fn $field(&mut self) -> $crate::Result<Option<$field_ty>> {
                        match self.inner.get(stringify!($field))? {
                            Some(value) if !value.is_null() => {
                                <$field_ty as $crate::FromValue>::from_value(value).map(Some)
                            }
                            _ => Ok(None),
                        }
                    }

                    pub fn [<set_ $field>](
                        &mut self,
                        value: impl Into<$crate::Value>,
                    ) -> $crate::Result<()> {
                        self.inner.set(stringify!($field), value, true)
                    }
                )*
            }
        }
    };
}
