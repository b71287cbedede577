pub mod token;

pub use token::{AuthToken, ClientCredentials, TokenExchange, TokenManager};
