//! Compile-time validation for the Entity derive macro.
//!
//! All checks run and their errors are combined, so one build reports every
//! problem in the struct at once.

use std::collections::HashMap;

use proc_macro2::Span;
use syn::Error;

use crate::parse::{EntityDef, Role};

/// Validate a parsed entity definition.
pub fn validate_entity(entity: &EntityDef) -> Result<(), Error> {
    let mut errors = Vec::new();

    validate_no_generics(entity, &mut errors);
    validate_has_columns(entity, &mut errors);
    if let Some(table) = &entity.table_name {
        validate_identifier("table name", table, entity.table_span, &mut errors);
    }
    for (_, column) in entity.columns() {
        validate_identifier("column name", &column.column_name, column.span, &mut errors);
    }
    validate_no_duplicate_columns(entity, &mut errors);
    validate_unique_roles(entity, &mut errors);
    validate_integer_key(entity, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        let mut combined = errors.remove(0);
        for err in errors {
            combined.combine(err);
        }
        Err(combined)
    }
}

fn validate_no_generics(entity: &EntityDef, errors: &mut Vec<Error>) {
    if !entity.generics.params.is_empty() {
        errors.push(Error::new_spanned(
            &entity.generics,
            "Entity cannot be derived for generic structs; metadata is static per type",
        ));
    }
}

fn validate_has_columns(entity: &EntityDef, errors: &mut Vec<Error>) {
    if entity.columns().next().is_none() {
        errors.push(Error::new(
            entity.name.span(),
            "Entity struct must have at least one persisted field",
        ));
    }
}

/// Identifiers are emitted unquoted, so only `[A-Za-z_][A-Za-z0-9_]*` is allowed.
fn validate_identifier(what: &str, name: &str, span: Span, errors: &mut Vec<Error>) {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        errors.push(Error::new(span, format!("{what} cannot be empty")));
        return;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        errors.push(Error::new(
            span,
            format!("{what} must start with a letter or underscore, got '{first}'"),
        ));
        return;
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        errors.push(Error::new(
            span,
            format!(
                "{what} '{name}' contains invalid character '{bad}'; \
                 only ASCII letters, digits and underscores are allowed"
            ),
        ));
    }
}

fn validate_no_duplicate_columns(entity: &EntityDef, errors: &mut Vec<Error>) {
    let mut seen: HashMap<&str, &syn::Ident> = HashMap::new();
    for (field, column) in entity.columns() {
        if let Some(previous) = seen.insert(column.column_name.as_str(), &field.name) {
            errors.push(Error::new(
                column.span,
                format!(
                    "duplicate column name '{}': fields `{}` and `{}` map to the same column",
                    column.column_name, previous, field.name
                ),
            ));
        }
    }
}

fn validate_unique_roles(entity: &EntityDef, errors: &mut Vec<Error>) {
    for role in [Role::Key, Role::RowVersion, Role::SoftDelete] {
        let fields: Vec<_> = entity
            .columns()
            .filter(|(_, column)| column.role == role)
            .collect();
        for (field, _) in fields.iter().skip(1) {
            errors.push(Error::new(
                field.name.span(),
                format!(
                    "only one field may be marked `{}`; `{}` already is",
                    role.attribute_name(),
                    fields[0].0.name
                ),
            ));
        }
    }
}

const INTEGER_TYPES: &[&str] = &[
    "i8", "i16", "i32", "i64", "isize", "u8", "u16", "u32", "u64", "usize",
];

/// Keys are surrogate row ids, written back from `last_insert_rowid`.
fn validate_integer_key(entity: &EntityDef, errors: &mut Vec<Error>) {
    let Some((field, _)) = entity.column_with_role(Role::Key) else {
        return;
    };
    let is_integer = match &field.ty {
        syn::Type::Path(path) if path.qself.is_none() => path
            .path
            .segments
            .last()
            .is_some_and(|segment| {
                segment.arguments.is_none()
                    && INTEGER_TYPES.contains(&segment.ident.to_string().as_str())
            }),
        _ => false,
    };
    if !is_integer {
        errors.push(Error::new_spanned(
            &field.ty,
            format!(
                "`key` field `{}` must be a primitive integer; keys are generated row ids",
                field.name
            ),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_entity;
    use syn::{DeriveInput, parse_quote};

    fn validate(input: &DeriveInput) -> Result<(), Error> {
        validate_entity(&parse_entity(input)?)
    }

    #[test]
    fn accepts_well_formed_entity() {
        let input: DeriveInput = parse_quote! {
            #[entity(table = "genre")]
            struct Genre {
                #[entity(key)]
                id: i64,
                name: String,
                #[entity(row_version)]
                row_version: NaiveDateTime,
                #[entity(soft_delete)]
                deleted: bool,
            }
        };
        assert!(validate(&input).is_ok());
    }

    #[test]
    fn rejects_duplicate_keys() {
        let input: DeriveInput = parse_quote! {
            #[entity(table = "genre")]
            struct Genre {
                #[entity(key)]
                id: i64,
                #[entity(key)]
                other_id: i64,
            }
        };
        let err = validate(&input).unwrap_err();
        assert!(err.to_string().contains("only one field may be marked `key`"), "{err}");
    }

    #[test]
    fn rejects_text_key() {
        let input: DeriveInput = parse_quote! {
            #[entity(table = "rating")]
            struct Rating {
                #[entity(key)]
                code: String,
                label: String,
            }
        };
        let err = validate(&input).unwrap_err();
        assert!(err.to_string().contains("must be a primitive integer"), "{err}");
    }

    #[test]
    fn accepts_narrow_integer_key() {
        let input: DeriveInput = parse_quote! {
            #[entity(table = "hall")]
            struct Hall {
                #[entity(key)]
                number: u32,
                seats: i32,
            }
        };
        assert!(validate(&input).is_ok());
    }

    #[test]
    fn rejects_duplicate_columns() {
        let input: DeriveInput = parse_quote! {
            #[entity(table = "genre")]
            struct Genre {
                name: String,
                #[entity(column = "name")]
                label: String,
            }
        };
        let err = validate(&input).unwrap_err();
        assert!(err.to_string().contains("duplicate column name 'name'"), "{err}");
    }

    #[test]
    fn rejects_invalid_table_name() {
        let input: DeriveInput = parse_quote! {
            #[entity(table = "genre; drop")]
            struct Genre {
                name: String,
            }
        };
        let err = validate(&input).unwrap_err();
        assert!(err.to_string().contains("invalid character"), "{err}");
    }

    #[test]
    fn rejects_generics() {
        let input: DeriveInput = parse_quote! {
            #[entity(table = "genre")]
            struct Genre<T> {
                name: T,
            }
        };
        let err = validate(&input).unwrap_err();
        assert!(err.to_string().contains("generic"), "{err}");
    }

    #[test]
    fn rejects_struct_without_columns() {
        let input: DeriveInput = parse_quote! {
            #[entity(table = "genre")]
            struct Genre {
                #[entity(skip)]
                label: String,
            }
        };
        let err = validate(&input).unwrap_err();
        assert!(err.to_string().contains("at least one persisted field"), "{err}");
    }
}
