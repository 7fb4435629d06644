//! Procedural macros for fluentmap.
//!
//! `fluentmap-macros` is the compile-time metadata layer. `#[derive(Entity)]`
//! turns an annotated struct into a `fluentmap_core::Entity` implementation
//! with static column and reference metadata, typed `Col<Self>` handles for
//! every persisted field, and the row-fragment glue used to materialize
//! joined results.

use proc_macro::TokenStream;
use syn::ext::IdentExt;

mod parse;
mod validate;

use parse::{EntityDef, Role, parse_entity};

/// Derive macro for the `Entity` trait.
///
/// # Attributes
///
/// - `#[entity(table = "name")]` on the struct - Table name. Without it the
///   entity still compiles, but builders report a metadata error when they
///   render SQL for it.
/// - `#[entity(key)]` - Surrogate identity column (primitive integer type)
/// - `#[entity(column = "name")]` - Override the column name
/// - `#[entity(row_version)]` - Optimistic-concurrency timestamp
/// - `#[entity(soft_delete)]` - Boolean inactive flag
/// - `#[entity(navigation)]` - Join-populated `Option<T>` property; the related
///   table is `T`'s table
/// - `#[entity(reference = "table")]` - Navigation property with an explicit
///   related table
/// - `#[entity(skip)]` - Neither persisted nor populated
///
/// # Example
///
/// ```ignore
/// use fluentmap::prelude::*;
///
/// #[derive(Debug, Default, Clone, Entity)]
/// #[entity(table = "movie")]
/// struct Movie {
///     #[entity(key)]
///     id: i64,
///     name: String,
///     genre_id: i64,
///     #[entity(row_version)]
///     row_version: NaiveDateTime,
///     #[entity(soft_delete)]
///     deleted: bool,
///     #[entity(navigation)]
///     genre: Option<Genre>,
/// }
///
/// // Generated handles:
/// let by_name = Select::<Movie>::new().select_all().r#where(Movie::NAME).equal("Alien");
/// ```
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let entity = match parse_entity(&input) {
        Ok(e) => e,
        Err(e) => return e.to_compile_error().into(),
    };

    if let Err(e) = validate::validate_entity(&entity) {
        return e.to_compile_error().into();
    }

    generate_entity_impl(&entity).into()
}

/// Generate the Entity trait implementation and the column constants.
fn generate_entity_impl(entity: &EntityDef) -> proc_macro2::TokenStream {
    let name = &entity.name;

    let table_name_ts = match &entity.table_name {
        Some(table) => quote::quote! { ::core::option::Option::Some(#table) },
        None => quote::quote! { ::core::option::Option::None },
    };

    let column_metas = generate_column_metas(entity);
    let reference_metas = generate_reference_metas(entity);
    let to_values_body = generate_to_values(entity);
    let apply_fragment_body = generate_apply_fragment(entity);
    let attach_body = generate_attach(entity);
    let (key_value_body, set_key_value_body) = generate_key_accessors(entity);
    let (row_version_body, set_row_version_body) = generate_row_version_accessors(entity);
    let column_consts = generate_column_consts(entity);

    quote::quote! {
        impl fluentmap_core::Entity for #name {
            const TABLE_NAME: ::core::option::Option<&'static str> = #table_name_ts;

            fn columns() -> &'static [fluentmap_core::ColumnMeta] {
                static COLUMNS: &[fluentmap_core::ColumnMeta] = &[
                    #column_metas
                ];
                COLUMNS
            }

            fn references() -> &'static [fluentmap_core::ReferenceMeta] {
                static REFERENCES: &[fluentmap_core::ReferenceMeta] = &[
                    #reference_metas
                ];
                REFERENCES
            }

            fn to_values(&self) -> ::std::vec::Vec<(&'static str, fluentmap_core::Value)> {
                #to_values_body
            }

            fn apply_fragment(
                &mut self,
                fragment: &fluentmap_core::RowFragment<'_>,
            ) -> fluentmap_core::Result<()> {
                #apply_fragment_body
            }

            fn attach(
                &mut self,
                fragment: &fluentmap_core::RowFragment<'_>,
            ) -> fluentmap_core::Result<bool> {
                #attach_body
            }

            fn key_value(&self) -> fluentmap_core::Value {
                #key_value_body
            }

            fn set_key_value(&mut self, id: i64) -> fluentmap_core::Result<()> {
                #set_key_value_body
            }

            fn row_version_value(&self) -> fluentmap_core::Value {
                #row_version_body
            }

            fn set_row_version_value(
                &mut self,
                value: &fluentmap_core::Value,
            ) -> fluentmap_core::Result<()> {
                #set_row_version_body
            }
        }

        impl #name {
            #column_consts
        }
    }
}

fn role_ts(role: Role) -> proc_macro2::TokenStream {
    match role {
        Role::Data => quote::quote! { fluentmap_core::ColumnRole::Data },
        Role::Key => quote::quote! { fluentmap_core::ColumnRole::Key },
        Role::RowVersion => quote::quote! { fluentmap_core::ColumnRole::RowVersion },
        Role::SoftDelete => quote::quote! { fluentmap_core::ColumnRole::SoftDelete },
    }
}

fn generate_column_metas(entity: &EntityDef) -> proc_macro2::TokenStream {
    let metas = entity.columns().map(|(field, column)| {
        let field_name = field.name.unraw().to_string();
        let column_name = &column.column_name;
        let role = role_ts(column.role);
        quote::quote! {
            fluentmap_core::ColumnMeta::new(#field_name, #column_name, #role)
        }
    });
    quote::quote! { #(#metas),* }
}

/// Related table expression: the explicit reference, or the target's own table.
fn navigation_table_ts(nav: &parse::NavigationAttr) -> proc_macro2::TokenStream {
    match &nav.table {
        Some(table) => quote::quote! { ::core::option::Option::Some(#table) },
        None => {
            let target = &nav.target;
            quote::quote! { <#target as fluentmap_core::Entity>::TABLE_NAME }
        }
    }
}

fn generate_reference_metas(entity: &EntityDef) -> proc_macro2::TokenStream {
    let metas = entity.navigations().map(|(field, nav)| {
        let field_name = field.name.unraw().to_string();
        let table = navigation_table_ts(nav);
        quote::quote! {
            fluentmap_core::ReferenceMeta::new(#field_name, #table)
        }
    });
    quote::quote! { #(#metas),* }
}

fn generate_to_values(entity: &EntityDef) -> proc_macro2::TokenStream {
    let conversions = entity.columns().map(|(field, column)| {
        let field_name = &field.name;
        let column_name = &column.column_name;
        quote::quote! {
            (#column_name, fluentmap_core::Value::from(::core::clone::Clone::clone(&self.#field_name)))
        }
    });
    quote::quote! {
        vec![#(#conversions),*]
    }
}

fn generate_apply_fragment(entity: &EntityDef) -> proc_macro2::TokenStream {
    let assignments = entity.columns().map(|(field, column)| {
        let field_name = &field.name;
        let column_name = &column.column_name;
        quote::quote! {
            fragment.assign(&mut self.#field_name, #column_name)?;
        }
    });
    quote::quote! {
        #(#assignments)*
        Ok(())
    }
}

/// Direct navigation properties claim a fragment of their table first; a
/// fragment nobody claims is offered to populated navigation properties so
/// join chains reach nested entities.
fn generate_attach(entity: &EntityDef) -> proc_macro2::TokenStream {
    let navs: Vec<_> = entity.navigations().collect();
    if navs.is_empty() {
        return quote::quote! {
            let _ = fragment;
            Ok(false)
        };
    }

    let direct = navs.iter().map(|(field, nav)| {
        let field_name = &field.name;
        let target = &nav.target;
        let table = navigation_table_ts(nav);
        quote::quote! {
            if #table == ::core::option::Option::Some(fragment.table()) {
                let mut related = <#target as ::core::default::Default>::default();
                fluentmap_core::Entity::apply_fragment(&mut related, fragment)?;
                self.#field_name = ::core::option::Option::Some(related);
                return Ok(true);
            }
        }
    });

    let nested = navs.iter().map(|(field, _)| {
        let field_name = &field.name;
        quote::quote! {
            if let ::core::option::Option::Some(related) = self.#field_name.as_mut() {
                if fluentmap_core::Entity::attach(related, fragment)? {
                    return Ok(true);
                }
            }
        }
    });

    quote::quote! {
        #(#direct)*
        #(#nested)*
        Ok(false)
    }
}

fn generate_key_accessors(
    entity: &EntityDef,
) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
    match entity.column_with_role(Role::Key) {
        Some((field, _)) => {
            let field_name = &field.name;
            let ty = &field.ty;
            (
                quote::quote! {
                    fluentmap_core::Value::from(::core::clone::Clone::clone(&self.#field_name))
                },
                quote::quote! {
                    self.#field_name = <#ty as fluentmap_core::FromValue>::from_value(
                        &fluentmap_core::Value::BigInt(id),
                    )?;
                    Ok(())
                },
            )
        }
        None => (
            quote::quote! { fluentmap_core::Value::Null },
            quote::quote! {
                let _ = id;
                Err(fluentmap_core::Error::metadata::<Self>("no key column declared"))
            },
        ),
    }
}

fn generate_row_version_accessors(
    entity: &EntityDef,
) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
    match entity.column_with_role(Role::RowVersion) {
        Some((field, _)) => {
            let field_name = &field.name;
            let ty = &field.ty;
            (
                quote::quote! {
                    fluentmap_core::Value::from(::core::clone::Clone::clone(&self.#field_name))
                },
                quote::quote! {
                    self.#field_name = <#ty as fluentmap_core::FromValue>::from_value(value)?;
                    Ok(())
                },
            )
        }
        None => (
            quote::quote! { fluentmap_core::Value::Null },
            quote::quote! {
                let _ = value;
                Err(fluentmap_core::Error::metadata::<Self>("no row version column declared"))
            },
        ),
    }
}

/// One `pub const FIELD: Col<Self>` per persisted field.
fn generate_column_consts(entity: &EntityDef) -> proc_macro2::TokenStream {
    let consts = entity.columns().map(|(field, column)| {
        let field_name = field.name.unraw().to_string();
        let const_name = syn::Ident::new(&parse::to_const_case(&field_name), field.name.span());
        let column_name = &column.column_name;
        let role = role_ts(column.role);
        let doc = format!("Column `{}`.", column_name);
        quote::quote! {
            #[doc = #doc]
            pub const #const_name: fluentmap_core::Col<Self> =
                fluentmap_core::Col::new(#field_name, #column_name, #role);
        }
    });
    quote::quote! { #(#consts)* }
}
