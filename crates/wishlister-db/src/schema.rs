use crate::migrations::EmbeddedSource;

/// The wishlist application's own schema, built into the binary.
pub const WISHLISTER_MIGRATIONS: &[(&str, &str)] = &[
    (
        "1_create_wishlists.sql",
        include_str!("../migrations/1_create_wishlists.sql"),
    ),
    (
        "2_create_wishlist_elements.sql",
        include_str!("../migrations/2_create_wishlist_elements.sql"),
    ),
    (
        "3_create_users.sql",
        include_str!("../migrations/3_create_users.sql"),
    ),
];

pub fn embedded() -> EmbeddedSource {
    EmbeddedSource::new(WISHLISTER_MIGRATIONS)
}
