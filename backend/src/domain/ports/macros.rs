//! `define_port_error!`: port error enums with snake_case constructors.
//!
//! Every variant gets a constructor taking `impl Into<_>` per field, so
//! adapters write `OutboxRepositoryError::query("timeout")`. Store ports
//! also tag each variant with the [`ErrorCode`](crate::domain::ErrorCode)
//! it surfaces as (`=> "message" => ServiceUnavailable`), which generates
//! `From<PortError> for Error` and lets services use `?` directly.

macro_rules! define_port_error {
    (@ctor $variant:ident) => {
        ::paste::paste! {
            pub fn [<$variant:snake>]() -> Self {
                Self::$variant
            }
        }
    };

    (@ctor $variant:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        ::paste::paste! {
            pub fn [<$variant:snake>]($($field: impl Into<$ty>),*) -> Self {
                Self::$variant { $($field: $field.into()),* }
            }
        }
    };

    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $( { $($field:ident : $ty:ty),* $(,)? } )?
                    => $message:expr => $code:ident
            ),* $(,)?
        }
    ) => {
        define_port_error! {
            $(#[$outer])*
            pub enum $name {
                $(
                    $(#[$variant_meta])*
                    $variant $( { $($field : $ty),* } )? => $message
                ),*
            }
        }

        impl From<$name> for $crate::domain::Error {
            fn from(error: $name) -> Self {
                let code = match &error {
                    $( $name::$variant $( { $($field: _),* } )? => $crate::domain::ErrorCode::$code, )*
                };
                $crate::domain::Error::new(code, error.to_string())
            }
        }
    };

    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $( { $($field:ident : $ty:ty),* $(,)? } )? => $message:expr
            ),* $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[error($message)]
                $variant $( { $($field : $ty),* } )?,
            )*
        }

        impl $name {
            $(
                define_port_error!(@ctor $variant $( { $($field : $ty),* } )?);
            )*
        }
    };
}

pub(crate) use define_port_error;

#[cfg(test)]
mod tests {
    use crate::domain::{Error, ErrorCode};

    define_port_error! {
        pub enum DeliveryPortError {
            Unreachable { message: String } => "unreachable: {message}",
            Throttled { retry_after_secs: u32 } => "throttled for {retry_after_secs}s",
            Partial { message: String, delivered: u32 } => "partial: {message} ({delivered})",
            Closed => "closed",
        }
    }

    define_port_error! {
        pub enum LedgerStoreError {
            Down { message: String } => "ledger store down: {message}" => ServiceUnavailable,
            Corrupt { row: u64, message: String } => "row {row} corrupt: {message}" => InternalError,
            Taken => "ledger row taken" => Conflict,
        }
    }

    #[test]
    fn constructors_accept_str_for_string_fields() {
        let err = DeliveryPortError::unreachable("smtp relay");
        assert_eq!(err.to_string(), "unreachable: smtp relay");
    }

    #[test]
    fn constructors_keep_mixed_field_types() {
        assert_eq!(
            DeliveryPortError::partial("batch", 7_u32).to_string(),
            "partial: batch (7)"
        );
        assert_eq!(
            DeliveryPortError::throttled(30_u32).to_string(),
            "throttled for 30s"
        );
    }

    #[test]
    fn unit_variants_get_nullary_constructors() {
        assert_eq!(DeliveryPortError::closed(), DeliveryPortError::Closed);
    }

    #[rstest::rstest]
    #[case(LedgerStoreError::down("refused"), ErrorCode::ServiceUnavailable, "ledger store down: refused")]
    #[case(LedgerStoreError::corrupt(9_u64, "bad json"), ErrorCode::InternalError, "row 9 corrupt: bad json")]
    #[case(LedgerStoreError::taken(), ErrorCode::Conflict, "ledger row taken")]
    fn tagged_variants_convert_to_domain_errors(
        #[case] port: LedgerStoreError,
        #[case] code: ErrorCode,
        #[case] message: &str,
    ) {
        let error = Error::from(port);

        assert_eq!(error.code(), code);
        assert_eq!(error.message(), message);
    }
}
