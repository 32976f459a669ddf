/// Builds `ValidationErrors` from field names and `code => message` pairs
#[macro_export]
macro_rules! validation_errors {
    ({$($field:tt: [$($code:tt => $msg:tt),*]),*}) => {{
        let mut errors = ::validator::ValidationErrors::new();
        $($(
            errors.add($field, ::validator::ValidationError {
                code: ::std::borrow::Cow::from($code),
                message: Some(::std::borrow::Cow::from($msg)),
                params: ::std::collections::HashMap::new(),
            });
        )*)*
        errors
    }};
}

/// Uuid backed identifier stored in a postgres `UUID` column
macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, FromSqlRow, AsExpression)]
        #[sql_type = "::diesel::sql_types::Uuid"]
        pub struct $name(pub ::uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(::uuid::Uuid::new_v4())
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = ::failure::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ::uuid::Uuid::parse_str(s)
                    .map($name)
                    .map_err(|e| format_err!("Invalid {} '{}': {}", stringify!($name), s, e))
            }
        }

        impl ::diesel::deserialize::FromSql<::diesel::sql_types::Uuid, ::diesel::pg::Pg> for $name {
            fn from_sql(bytes: Option<&[u8]>) -> ::diesel::deserialize::Result<Self> {
                <::uuid::Uuid as ::diesel::deserialize::FromSql<::diesel::sql_types::Uuid, ::diesel::pg::Pg>>::from_sql(bytes).map($name)
            }
        }

        impl ::diesel::serialize::ToSql<::diesel::sql_types::Uuid, ::diesel::pg::Pg> for $name {
            fn to_sql<W: ::std::io::Write>(&self, out: &mut ::diesel::serialize::Output<W, ::diesel::pg::Pg>) -> ::diesel::serialize::Result {
                <::uuid::Uuid as ::diesel::serialize::ToSql<::diesel::sql_types::Uuid, ::diesel::pg::Pg>>::to_sql(&self.0, out)
            }
        }
    };
}

/// Maps an enum with `as_str` and `FromStr` onto a postgres `VARCHAR` column
macro_rules! varchar_enum_sql {
    ($name:ident) => {
        impl ::diesel::deserialize::FromSql<::diesel::sql_types::VarChar, ::diesel::pg::Pg> for $name {
            fn from_sql(bytes: Option<&[u8]>) -> ::diesel::deserialize::Result<Self> {
                match bytes {
                    Some(value) => ::std::str::from_utf8(value)?
                        .parse::<$name>()
                        .map_err(|e| e.to_string().into()),
                    None => Err(concat!("Unexpected null for non-null ", stringify!($name), " column").into()),
                }
            }
        }

        impl ::diesel::serialize::ToSql<::diesel::sql_types::VarChar, ::diesel::pg::Pg> for $name {
            fn to_sql<W: ::std::io::Write>(&self, out: &mut ::diesel::serialize::Output<W, ::diesel::pg::Pg>) -> ::diesel::serialize::Result {
                ::std::io::Write::write_all(out, self.as_str().as_bytes())?;
                Ok(::diesel::serialize::IsNull::No)
            }
        }
    };
}

/// Asserts the error kind found in the chain of a `failure::Error`
#[cfg(test)]
macro_rules! assert_error_kind {
    ($err:expr, $kind:pat) => {
        assert_error_kind!($err, $kind => ())
    };
    ($err:expr, $kind:pat => $then:expr) => {
        match ::errors::error_kind(&$err) {
            Some(&$kind) => $then,
            other => panic!("unexpected error kind {:?} of {}", other, $err),
        }
    };
}
