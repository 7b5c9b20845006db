use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendshipStatus {
    Active,
    Inactive,
}

impl FriendshipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FriendshipStatus::Active => "ACTIVE",
            FriendshipStatus::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for FriendshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::graph::users)]
pub struct NewUser<'a> {
    pub name: &'a str,
}

#[derive(Debug, Identifiable, Queryable, Selectable)]
#[diesel(table_name = crate::schema::graph::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbUser {
    pub id: i64,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::graph::friendships)]
pub struct NewFriendship {
    pub user1_id: i64,
    pub user2_id: i64,
    pub status: String,
}

#[derive(Debug, Identifiable, Queryable, Selectable)]
#[diesel(table_name = crate::schema::graph::friendships)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbFriendship {
    pub id: i64,
    pub user1_id: i64,
    pub user2_id: i64,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::graph::referrals)]
pub struct NewReferral {
    pub referrer_id: i64,
    pub referred_id: i64,
}

#[derive(Debug, Identifiable, Queryable, Selectable)]
#[diesel(table_name = crate::schema::graph::referrals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbReferral {
    pub id: i64,
    pub referrer_id: i64,
    pub referred_id: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable, Serialize)]
#[diesel(table_name = crate::schema::graph::transaction_logs)]
pub struct NewTransactionLog {
    pub user_id: Option<i64>,
    pub transaction_type: String,
    pub transaction_data: serde_json::Value,
}

#[derive(Debug, Identifiable, Queryable, Selectable)]
#[diesel(table_name = crate::schema::graph::transaction_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbTransactionLog {
    pub id: i64,
    pub user_id: Option<i64>,
    pub transaction_type: String,
    pub transaction_data: serde_json::Value,
    pub processed_at: NaiveDateTime,
}
