//! Macros for defining uuid-backed resource ids.

/// Macro to define a typed resource id backed by an RFC-4122 uuid.
///
/// This generates a newtype wrapper around [`uuid::Uuid`] with:
/// - A `KIND` constant naming the resource type
/// - `new()` to generate a fresh random (v4) id
/// - `parse()` to parse from the hyphenated string form
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` implementations (as a plain string)
///
/// # Example
///
/// ```ignore
/// define_uuid_id!(PodUuid, "pod");
///
/// let id = PodUuid::new();
/// let parsed: PodUuid = "5c7f0a6e-3d1b-4c2a-9a51-0f3c3b5d7e21".parse()?;
/// ```
#[macro_export]
macro_rules! define_uuid_id {
    ($name:ident, $kind:literal) => {
        /// A typed uuid for this resource type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Uuid);

        impl $name {
            /// The resource kind this id identifies.
            pub const KIND: &'static str = $kind;

            /// Creates a new random (v4) id.
            #[must_use]
            pub fn new() -> Self {
                Self($crate::Uuid::new_v4())
            }

            /// Creates an id from a raw uuid.
            #[must_use]
            pub const fn from_uuid(uuid: $crate::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying uuid.
            #[must_use]
            pub const fn uuid(&self) -> $crate::Uuid {
                self.0
            }

            /// Parses an id from its string form.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                $crate::Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| $crate::IdError::InvalidUuid {
                        value: s.to_string(),
                        message: e.to_string(),
                    })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<$crate::Uuid> for $name {
            fn as_ref(&self) -> &$crate::Uuid {
                &self.0
            }
        }
    };
}
