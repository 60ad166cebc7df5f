//! Database entities

pub mod member;

pub use member::Entity as Member;

pub mod prelude {
    pub use super::member::Entity as Member;
}
