//! Client/server property name mapping.

use serde::{Deserialize, Serialize};

/// Maps client property names to the names the data service uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NamingConvention {
    /// Names are identical on both sides.
    #[default]
    None,
    /// `camelCase` on the client, `PascalCase` on the server.
    CamelCase,
}

impl NamingConvention {
    /// Returns the server name of a client property.
    pub fn server_property_name(&self, client_name: &str) -> String {
        match self {
            NamingConvention::None => client_name.to_string(),
            NamingConvention::CamelCase => map_first_char(client_name, char::to_ascii_uppercase),
        }
    }

    /// Returns the client name of a server property.
    pub fn client_property_name(&self, server_name: &str) -> String {
        match self {
            NamingConvention::None => server_name.to_string(),
            NamingConvention::CamelCase => map_first_char(server_name, char::to_ascii_lowercase),
        }
    }
}

fn map_first_char(name: &str, f: fn(&char) -> char) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => std::iter::once(f(&first)).chain(chars).collect(),
        None => String::new(),
    }
}
