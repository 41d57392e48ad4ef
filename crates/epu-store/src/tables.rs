//! redb table definitions for the EPUM domain/instance store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Composite keys follow the pattern `{owner}/{domain_id}`.

use redb::TableDefinition;

/// Domains keyed by `{owner}/{domain_id}`.
pub const DOMAINS: TableDefinition<&str, &[u8]> = TableDefinition::new("domains");

/// Instances keyed by bare `instance_id`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Reverse index: `instance_id` → `{owner}/{domain_id}`.
pub const INSTANCE_DOMAIN_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("instance_domain_index");
