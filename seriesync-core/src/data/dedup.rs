//! Request flattening for export and sync.
//!
//! A request list mixes bare identifiers and basket names. Flattening expands
//! baskets in place (depth first, members in catalog order) and keeps only the
//! first occurrence of every identifier, so an identifier requested both
//! directly and through one or more baskets yields exactly one column.

use super::catalog::IdentifierCatalog;
use super::provider::DataError;
use crate::domain::Identifier;
use std::collections::{HashSet, VecDeque};

enum Pending {
    Request(String),
    Member(Identifier),
}

/// Expand `requests` into a duplicate-free, order-preserving identifier list.
///
/// A basket reached a second time (directly or through another basket) is
/// not expanded again. Unknown basket names cannot occur here: anything the
/// catalog does not know is an identifier. Membership fetch failures propagate.
pub fn flatten_requests<S: AsRef<str>>(
    requests: &[S],
    catalog: &IdentifierCatalog,
) -> Result<Vec<Identifier>, DataError> {
    let mut work: VecDeque<Pending> = requests
        .iter()
        .map(|r| Pending::Request(r.as_ref().to_string()))
        .collect();

    let mut visited_baskets: HashSet<String> = HashSet::new();
    let mut seen: HashSet<Identifier> = HashSet::new();
    let mut flat = Vec::new();

    while let Some(next) = work.pop_front() {
        let identifier = match next {
            Pending::Request(name) if catalog.is_basket(&name) => {
                let code = catalog.code(&name).unwrap_or(name.as_str()).to_string();
                if !visited_baskets.insert(code) {
                    tracing::debug!(basket = %name, "basket already expanded");
                    continue;
                }
                let members = catalog.resolve(&name)?;
                for member in members.into_iter().rev() {
                    work.push_front(Pending::Member(member));
                }
                continue;
            }
            Pending::Request(name) => Identifier::new(name),
            Pending::Member(member) if catalog.is_basket(member.as_str()) => {
                work.push_front(Pending::Request(member.into_string()));
                continue;
            }
            Pending::Member(member) => member,
        };

        if seen.insert(identifier.clone()) {
            flat.push(identifier);
        }
    }

    Ok(flat)
}
