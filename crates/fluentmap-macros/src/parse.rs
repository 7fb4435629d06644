//! Parsing logic for the Entity derive macro.
//!
//! This module extracts struct-level and field-level `#[entity(...)]`
//! attributes from the derive input to build the `EntityDef` and `FieldDef`
//! structures used for code generation.

use proc_macro2::Span;
use quote::ToTokens;
use syn::ext::IdentExt;
use syn::{
    Attribute, Data, DeriveInput, Error, Field, Fields, GenericArgument, Generics, Ident, Lit,
    PathArguments, Result, Type,
};

/// Parsed entity definition from a struct with `#[derive(Entity)]`.
#[derive(Debug)]
pub struct EntityDef {
    /// The struct name (e.g., `Movie`).
    pub name: Ident,
    /// The SQL table name, if declared.
    pub table_name: Option<String>,
    /// Span of the table attribute, for error reporting.
    pub table_span: Span,
    /// Parsed field definitions, in declaration order.
    pub fields: Vec<FieldDef>,
    /// Generic parameters from the struct.
    pub generics: Generics,
}

impl EntityDef {
    /// Fields that map to a column.
    pub fn columns(&self) -> impl Iterator<Item = (&FieldDef, &ColumnAttr)> {
        self.fields.iter().filter_map(|f| match &f.kind {
            FieldKind::Column(col) => Some((f, col)),
            _ => None,
        })
    }

    /// Navigation properties.
    pub fn navigations(&self) -> impl Iterator<Item = (&FieldDef, &NavigationAttr)> {
        self.fields.iter().filter_map(|f| match &f.kind {
            FieldKind::Navigation(nav) => Some((f, nav)),
            _ => None,
        })
    }

    /// The column field carrying `role`, if any.
    pub fn column_with_role(&self, role: Role) -> Option<(&FieldDef, &ColumnAttr)> {
        self.columns().find(|(_, col)| col.role == role)
    }
}

/// Parsed field definition from a struct field.
#[derive(Debug)]
pub struct FieldDef {
    /// The Rust field name (e.g., `genre_id`).
    pub name: Ident,
    /// The Rust type of the field.
    pub ty: Type,
    pub kind: FieldKind,
}

/// What a field maps to.
#[derive(Debug)]
pub enum FieldKind {
    Column(ColumnAttr),
    Navigation(NavigationAttr),
    /// Not persisted, not populated.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Data,
    Key,
    RowVersion,
    SoftDelete,
}

impl Role {
    pub fn attribute_name(self) -> &'static str {
        match self {
            Role::Data => "column",
            Role::Key => "key",
            Role::RowVersion => "row_version",
            Role::SoftDelete => "soft_delete",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnAttr {
    /// Physical column name (defaults to the field name).
    pub column_name: String,
    pub role: Role,
    /// Span of the column name, for error reporting.
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct NavigationAttr {
    /// Explicit related table from `reference = "..."`.
    pub table: Option<String>,
    /// The `T` of the `Option<T>` field.
    pub target: Type,
}

/// Parse a `DeriveInput` into an `EntityDef`.
pub fn parse_entity(input: &DeriveInput) -> Result<EntityDef> {
    let name = input.ident.clone();
    let generics = input.generics.clone();

    let (table_name, table_span) = parse_struct_attrs(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not unions",
            ));
        }
    };

    Ok(EntityDef {
        name,
        table_name,
        table_span: table_span.unwrap_or_else(|| input.ident.span()),
        fields,
        generics,
    })
}

fn parse_struct_attrs(attrs: &[Attribute]) -> Result<(Option<String>, Option<Span>)> {
    let mut table_name: Option<String> = None;
    let mut table_span: Option<Span> = None;

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                if table_name.is_some() {
                    return Err(Error::new_spanned(
                        meta.path,
                        "duplicate entity attribute: table",
                    ));
                }
                let value: Lit = meta.value()?.parse()?;
                if let Lit::Str(lit_str) = value {
                    table_name = Some(lit_str.value());
                    table_span = Some(lit_str.span());
                    Ok(())
                } else {
                    Err(Error::new_spanned(
                        value,
                        "expected string literal for table name",
                    ))
                }
            } else {
                let attr_name = meta.path.to_token_stream().to_string();
                Err(Error::new_spanned(
                    meta.path,
                    format!("unknown entity attribute `{attr_name}`. Valid attributes are: table"),
                ))
            }
        })?;
    }

    Ok((table_name, table_span))
}

/// Parse all fields from a struct.
fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Entity requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Entity requires a struct with fields, not a unit struct",
        )),
    }
}

/// Intermediate struct for collecting field attributes.
#[derive(Default)]
struct FieldAttrs {
    column: Option<(String, Span)>,
    roles: Vec<(Role, Span)>,
    navigation: bool,
    reference: Option<String>,
    skip: bool,
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
    let ty = field.ty.clone();
    let attrs = parse_field_attrs(&field.attrs)?;

    let kind = if attrs.skip {
        if attrs.column.is_some() || !attrs.roles.is_empty() || attrs.navigation {
            return Err(Error::new_spanned(
                &name,
                "`skip` cannot be combined with other entity attributes",
            ));
        }
        FieldKind::Skip
    } else if attrs.navigation {
        if attrs.column.is_some() || !attrs.roles.is_empty() {
            return Err(Error::new_spanned(
                &name,
                "navigation properties are not persisted and cannot carry column attributes",
            ));
        }
        let target = option_inner_type(&ty).cloned().ok_or_else(|| {
            Error::new_spanned(
                &ty,
                "navigation properties must be declared as `Option<T>` where `T: Entity`",
            )
        })?;
        FieldKind::Navigation(NavigationAttr {
            table: attrs.reference,
            target,
        })
    } else {
        if attrs.roles.len() > 1 {
            let (role, span) = attrs.roles[1];
            return Err(Error::new(
                span,
                format!(
                    "`{}` conflicts with `{}`: a field has at most one role",
                    role.attribute_name(),
                    attrs.roles[0].0.attribute_name()
                ),
            ));
        }
        let role = attrs.roles.first().map_or(Role::Data, |(role, _)| *role);
        let (column_name, span) = attrs
            .column
            .unwrap_or_else(|| (name.unraw().to_string(), name.span()));
        FieldKind::Column(ColumnAttr {
            column_name,
            role,
            span,
        })
    };

    Ok(FieldDef { name, ty, kind })
}

/// Parse all `#[entity(...)]` attributes on a field.
fn parse_field_attrs(attrs: &[Attribute]) -> Result<FieldAttrs> {
    let mut result = FieldAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;

            if path.is_ident("key") {
                result.roles.push((Role::Key, path_span(path)));
            } else if path.is_ident("row_version") {
                result.roles.push((Role::RowVersion, path_span(path)));
            } else if path.is_ident("soft_delete") {
                result.roles.push((Role::SoftDelete, path_span(path)));
            } else if path.is_ident("skip") {
                result.skip = true;
            } else if path.is_ident("navigation") {
                result.navigation = true;
            } else if path.is_ident("column") {
                let value: Lit = meta.value()?.parse()?;
                if let Lit::Str(lit_str) = value {
                    result.column = Some((lit_str.value(), lit_str.span()));
                } else {
                    return Err(Error::new_spanned(
                        value,
                        "expected string literal for column name",
                    ));
                }
            } else if path.is_ident("reference") {
                let value: Lit = meta.value()?.parse()?;
                if let Lit::Str(lit_str) = value {
                    result.navigation = true;
                    result.reference = Some(lit_str.value());
                } else {
                    return Err(Error::new_spanned(
                        value,
                        "expected string literal for reference table",
                    ));
                }
            } else {
                let attr_name = path.to_token_stream().to_string();
                return Err(Error::new_spanned(
                    path,
                    format!(
                        "unknown entity attribute `{attr_name}`. \
                         Valid attributes are: key, column, row_version, soft_delete, \
                         navigation, reference, skip"
                    ),
                ));
            }

            Ok(())
        })?;
    }

    Ok(result)
}

fn path_span(path: &syn::Path) -> Span {
    path.segments
        .first()
        .map_or_else(Span::call_site, |segment| segment.ident.span())
}

/// The `T` of an `Option<T>` type, matched on the last path segment.
pub fn option_inner_type(ty: &Type) -> Option<&Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

/// Convert a field name to the associated constant name (`genre_id` -> `GENRE_ID`).
pub fn to_const_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower = false;
    for ch in s.trim_start_matches("r#").chars() {
        if ch.is_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        out.extend(ch.to_uppercase());
    }
    out
}
