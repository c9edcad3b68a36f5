pub mod health;
pub mod signed_url;
