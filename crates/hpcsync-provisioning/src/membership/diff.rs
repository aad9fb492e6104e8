//! Membership diff engine.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use hpcsync_connector::command::AccountingCommand;
use hpcsync_connector::traits::Association;

/// Desired grouping → member set.
pub type DesiredMembership = BTreeMap<String, BTreeSet<String>>;

/// Member → desired grouping. When upstream lists a member in more than
/// one grouping the first grouping in name order wins.
fn reverse_index(desired: &DesiredMembership) -> BTreeMap<&str, &str> {
    let mut index = BTreeMap::new();
    for (grouping, members) in desired {
        for member in members {
            index.entry(member.as_str()).or_insert(grouping.as_str());
        }
    }
    index
}

/// Commands converging one cluster's memberships to `desired`.
///
/// - members downstream but not desired-and-active anywhere are removed
///   from the cluster outright
/// - desired active members missing downstream are added to their grouping
/// - active members attached to a grouping that no longer wants them are
///   moved: added to the new grouping first, then removed from the old one;
///   a grouping missing from `desired` wants nobody
///
/// Inactive members are never added or moved. Grouping rows (`member` is
/// `None`) are ignored here.
pub fn diff_cluster(
    cluster: &str,
    current: &[Association],
    desired: &DesiredMembership,
    active: &BTreeSet<String>,
) -> Vec<AccountingCommand> {
    let mut current_by_grouping: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut current_members: BTreeSet<&str> = BTreeSet::new();
    for association in current.iter().filter(|a| a.cluster == cluster) {
        if let Some(member) = association.member.as_deref() {
            current_members.insert(member);
            current_by_grouping
                .entry(association.grouping.as_str())
                .or_default()
                .insert(member);
        }
    }

    let active_desired: BTreeSet<&str> = desired
        .values()
        .flatten()
        .filter(|m| active.contains(*m))
        .map(String::as_str)
        .collect();
    let remove_set: BTreeSet<&str> = current_members
        .difference(&active_desired)
        .copied()
        .collect();

    let mut commands: Vec<AccountingCommand> = remove_set
        .iter()
        .map(|m| AccountingCommand::remove_member(*m, cluster))
        .collect();

    let index = reverse_index(desired);
    let no_members = BTreeSet::new();
    let nobody_wanted = BTreeSet::new();

    // Groupings no longer desired still have to release their members.
    let groupings: BTreeSet<&str> = desired
        .keys()
        .map(String::as_str)
        .chain(current_by_grouping.keys().copied())
        .collect();

    for grouping in groupings {
        let wanted = desired.get(grouping).unwrap_or(&nobody_wanted);
        for member in wanted {
            if active.contains(member) && !current_members.contains(member.as_str()) {
                commands.push(AccountingCommand::add_member(member, grouping, cluster));
            }
        }

        let attached = current_by_grouping.get(grouping).unwrap_or(&no_members);
        for member in attached
            .iter()
            .filter(|m| !wanted.contains(**m) && active.contains(**m))
        {
            match index.get(member) {
                Some(target) => {
                    commands.push(AccountingCommand::add_member(*member, *target, cluster));
                    commands.push(AccountingCommand::remove_member_from(
                        *member, grouping, cluster,
                    ));
                }
                None => {
                    debug!(
                        cluster,
                        member,
                        grouping,
                        "Member has no desired grouping, already scheduled for removal"
                    );
                }
            }
        }
    }

    commands
}

/// Groupings desired but absent on the cluster.
pub fn missing_groupings<'a>(
    cluster: &str,
    current: &[Association],
    desired: &'a DesiredMembership,
) -> Vec<&'a str> {
    let present: BTreeSet<&str> = current
        .iter()
        .filter(|a| a.cluster == cluster)
        .map(|a| a.grouping.as_str())
        .collect();
    desired
        .keys()
        .map(String::as_str)
        .filter(|g| !present.contains(g))
        .collect()
}
