// Table definitions for the `graph` Postgres schema. Hand-written in the
// same shape `diesel print-schema` would emit, since this repo has no
// live database to generate against.

pub mod graph {
    diesel::table! {
        graph.users (id) {
            id -> Int8,
            name -> Text,
            created_at -> Timestamp,
            updated_at -> Timestamp,
        }
    }

    diesel::table! {
        graph.friendships (id) {
            id -> Int8,
            user1_id -> Int8,
            user2_id -> Int8,
            status -> Text,
            created_at -> Timestamp,
            updated_at -> Timestamp,
        }
    }

    diesel::table! {
        graph.referrals (id) {
            id -> Int8,
            referrer_id -> Int8,
            referred_id -> Int8,
            created_at -> Timestamp,
        }
    }

    diesel::table! {
        graph.transaction_logs (id) {
            id -> Int8,
            user_id -> Nullable<Int8>,
            transaction_type -> Text,
            transaction_data -> Jsonb,
            processed_at -> Timestamp,
        }
    }

    diesel::joinable!(referrals -> users (referrer_id));
    diesel::joinable!(transaction_logs -> users (user_id));

    diesel::allow_tables_to_appear_in_same_query!(users, friendships, referrals, transaction_logs,);
}
