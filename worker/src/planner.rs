//! Turns a page of decoded events into a `BatchPlan`: the set of names
//! that need identity resolution, plus the per-kind operation lists still
//! keyed by name (spec §4.3, §4.4). `AddFriend`/`Unfriend` events stay in
//! one input-ordered list rather than being split apart here, since the
//! store projector needs that interleaving to resolve each pair's
//! terminal status.

use crate::event::Event;
use graph_store::models::NewTransactionLog;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct BatchPlan {
    pub names: HashSet<String>,
    pub referrals: Vec<(String, String)>,
    /// `AddFriend`/`Unfriend` events in input order, not yet separated by
    /// kind — a pair can appear under both kinds within one batch, and
    /// only the *last* occurrence decides its terminal status (spec §4.4,
    /// §8 property 7), so the interleaving must survive past this point.
    pub friend_events: Vec<FriendEvent>,
    pub logs: Vec<PendingLog>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendEvent {
    pub user1_name: String,
    pub user2_name: String,
    pub is_add: bool,
}

/// A transaction log row whose `user_id` still needs to be resolved
/// from `subject_name` (registrations have no subject and log as
/// `user_id = NULL`, per spec §3).
#[derive(Debug)]
pub struct PendingLog {
    pub subject_name: Option<String>,
    pub transaction_type: &'static str,
    pub transaction_data: serde_json::Value,
}

pub fn plan(events: &[Event]) -> BatchPlan {
    let mut plan = BatchPlan::default();

    for event in events {
        match event {
            Event::Register { name } => {
                plan.names.insert(name.clone());
                plan.logs.push(PendingLog {
                    subject_name: None,
                    transaction_type: "REGISTER",
                    transaction_data: serde_json::json!({ "name": name }),
                });
            }
            Event::Referral { referred_by, user } => {
                plan.names.insert(referred_by.clone());
                plan.names.insert(user.clone());
                plan.referrals.push((referred_by.clone(), user.clone()));
                plan.logs.push(PendingLog {
                    subject_name: Some(user.clone()),
                    transaction_type: "REFERRAL",
                    transaction_data: serde_json::json!({
                        "referred_by": referred_by,
                        "user": user,
                    }),
                });
            }
            Event::AddFriend { user1_name, user2_name } => {
                plan.names.insert(user1_name.clone());
                plan.names.insert(user2_name.clone());
                plan.friend_events.push(FriendEvent {
                    user1_name: user1_name.clone(),
                    user2_name: user2_name.clone(),
                    is_add: true,
                });
                plan.logs.push(PendingLog {
                    subject_name: Some(user1_name.clone()),
                    transaction_type: "ADD_FRIEND",
                    transaction_data: serde_json::json!({
                        "user1_name": user1_name,
                        "user2_name": user2_name,
                    }),
                });
            }
            Event::Unfriend { user1_name, user2_name } => {
                plan.names.insert(user1_name.clone());
                plan.names.insert(user2_name.clone());
                plan.friend_events.push(FriendEvent {
                    user1_name: user1_name.clone(),
                    user2_name: user2_name.clone(),
                    is_add: false,
                });
                plan.logs.push(PendingLog {
                    subject_name: Some(user1_name.clone()),
                    transaction_type: "UNFRIEND",
                    transaction_data: serde_json::json!({
                        "user1_name": user1_name,
                        "user2_name": user2_name,
                    }),
                });
            }
        }
    }

    plan
}

impl PendingLog {
    pub fn resolve(self, ids: &std::collections::HashMap<String, i64>) -> NewTransactionLog {
        NewTransactionLog {
            user_id: self.subject_name.and_then(|name| ids.get(&name).copied()),
            transaction_type: self.transaction_type.to_string(),
            transaction_data: self.transaction_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_collects_names_across_event_kinds() {
        let events = vec![
            Event::Register { name: "alice".into() },
            Event::Referral { referred_by: "alice".into(), user: "carol".into() },
            Event::AddFriend { user1_name: "alice".into(), user2_name: "bob".into() },
            Event::Unfriend { user1_name: "bob".into(), user2_name: "dan".into() },
        ];

        let plan = plan(&events);

        assert_eq!(plan.names.len(), 4);
        assert_eq!(plan.referrals, vec![("alice".to_string(), "carol".to_string())]);
        assert_eq!(
            plan.friend_events,
            vec![
                FriendEvent { user1_name: "alice".into(), user2_name: "bob".into(), is_add: true },
                FriendEvent { user1_name: "bob".into(), user2_name: "dan".into(), is_add: false },
            ]
        );
        assert_eq!(plan.logs.len(), 4);
    }

    #[test]
    fn friend_events_preserve_interleaved_add_unfriend_order() {
        let events = vec![
            Event::AddFriend { user1_name: "a".into(), user2_name: "b".into() },
            Event::Unfriend { user1_name: "a".into(), user2_name: "b".into() },
            Event::AddFriend { user1_name: "a".into(), user2_name: "b".into() },
        ];

        let plan = plan(&events);

        assert_eq!(
            plan.friend_events,
            vec![
                FriendEvent { user1_name: "a".into(), user2_name: "b".into(), is_add: true },
                FriendEvent { user1_name: "a".into(), user2_name: "b".into(), is_add: false },
                FriendEvent { user1_name: "a".into(), user2_name: "b".into(), is_add: true },
            ]
        );
    }

    #[test]
    fn register_log_has_no_subject() {
        let events = vec![Event::Register { name: "alice".into() }];
        let plan = plan(&events);
        assert_eq!(plan.logs[0].subject_name, None);
        assert_eq!(plan.logs[0].transaction_type, "REGISTER");
    }

    #[test]
    fn pending_log_resolves_user_id_from_name() {
        let mut ids = std::collections::HashMap::new();
        ids.insert("alice".to_string(), 42i64);

        let log = PendingLog {
            subject_name: Some("alice".to_string()),
            transaction_type: "ADD_FRIEND",
            transaction_data: serde_json::json!({}),
        };

        let resolved = log.resolve(&ids);
        assert_eq!(resolved.user_id, Some(42));
    }
}
