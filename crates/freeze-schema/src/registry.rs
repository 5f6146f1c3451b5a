//! Startup-time registry of the sandbox's resource modules.
//!
//! Every table and column the store is allowed to touch is declared here as
//! static data. SQL is only ever generated from these descriptors, never from
//! names arriving in a request body.

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }
}

/// One restorable payload column. Identity, provenance, and timestamp columns
/// are owned by the store and are deliberately absent from the registry.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    pub required: bool,
    pub unique: bool,
}

impl ColumnSpec {
    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub const fn real(name: &'static str) -> Self {
        Self::new(name, ColumnType::Real)
    }

    const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            required: false,
            unique: false,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModuleSchema {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
}

impl ModuleSchema {
    pub fn column(&self, name: &str) -> Option<&'static ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }
}

use ColumnSpec as C;

static MODULES: &[ModuleSchema] = &[
    ModuleSchema {
        name: "books",
        columns: &[
            C::text("title").required(),
            C::text("author").required(),
            C::text("isbn"),
            C::text("genre"),
            C::integer("year"),
            C::integer("available"),
        ],
    },
    ModuleSchema {
        name: "menu_items",
        columns: &[
            C::text("name").required(),
            C::text("description"),
            C::real("price").required(),
            C::text("category").required(),
            C::integer("is_available"),
            C::text("image_url"),
        ],
    },
    ModuleSchema {
        name: "tasks",
        columns: &[
            C::text("title").required(),
            C::text("description"),
            C::text("status"),
            C::text("priority"),
            C::text("due_date"),
            C::text("assigned_to"),
        ],
    },
    ModuleSchema {
        name: "students",
        columns: &[
            C::text("name").required(),
            C::text("email"),
            C::text("student_id").unique(),
            C::text("major"),
            C::real("gpa"),
            C::integer("enrollment_year"),
        ],
    },
    ModuleSchema {
        name: "notes",
        columns: &[
            C::text("title").required(),
            C::text("content"),
            C::text("category"),
            C::integer("is_pinned"),
        ],
    },
    ModuleSchema {
        name: "files",
        columns: &[
            C::text("filename").required(),
            C::text("original_name").required(),
            C::text("file_type"),
            C::integer("file_size"),
            C::text("uploaded_by"),
        ],
    },
    ModuleSchema {
        name: "blog_posts",
        columns: &[
            C::text("title").required(),
            C::text("content").required(),
            C::text("author").required(),
            C::text("tags"),
            C::integer("is_published"),
        ],
    },
    ModuleSchema {
        name: "inventory",
        columns: &[
            C::text("name").required(),
            C::text("sku").unique(),
            C::integer("quantity"),
            C::real("price"),
            C::text("category"),
            C::text("warehouse"),
        ],
    },
];

static BY_NAME: Lazy<HashMap<&'static str, &'static ModuleSchema>> =
    Lazy::new(|| MODULES.iter().map(|m| (m.name, m)).collect());

/// All registered modules, in declaration order.
pub fn modules() -> &'static [ModuleSchema] {
    MODULES
}

/// Look up a module by table name.
pub fn module(name: &str) -> Option<&'static ModuleSchema> {
    BY_NAME.get(name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_known_tables() {
        let books = module("books").expect("books registered");
        assert!(books.column("title").is_some());
        assert!(books.column("id").is_none());
        assert!(books.column("origin").is_none());
        assert!(module("user_modifications").is_none());
    }

    #[test]
    fn every_module_has_at_least_one_required_column() {
        for m in modules() {
            assert!(
                m.columns.iter().any(|c| c.required),
                "{} has no required column",
                m.name
            );
        }
    }
}
