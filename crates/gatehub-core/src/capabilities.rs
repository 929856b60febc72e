//! Central registry of capability names.
//!
//! The core is capability-agnostic beyond the `admin` super-capability;
//! this list exists so the built-in functions, docs, and permission dumps
//! stay aligned. Keep ids dot.case and grouped by surface.

/// Grants every other capability implicitly.
pub const ADMIN: &str = "admin";

// User administration
pub const USERS_CREATE: &str = "users.create";
pub const USERS_VIEW: &str = "users.view";
pub const USERS_DELETE: &str = "users.delete";
pub const USERS_ROLES_EDIT: &str = "users.roles.edit";
pub const USERS_PASSWORD_EDIT: &str = "users.password.edit";

/// Every capability the built-in surface knows about, `admin` first.
pub fn known() -> &'static [&'static str] {
    &[
        ADMIN,
        USERS_CREATE,
        USERS_VIEW,
        USERS_DELETE,
        USERS_ROLES_EDIT,
        USERS_PASSWORD_EDIT,
    ]
}
