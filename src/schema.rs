//! Table definitions. Master database tables first, then the tables every store database carries.

table! {
    stores (id) {
        id -> Uuid,
        slug -> VarChar,
        name -> VarChar,
        status -> VarChar,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

table! {
    store_databases (store_id) {
        store_id -> Uuid,
        encrypted_credentials -> Text,
        credentials_version -> Integer,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        revoked_at -> Nullable<Timestamp>,
    }
}

table! {
    jobs (id) {
        id -> Uuid,
        store_id -> Uuid,
        job_type -> VarChar,
        priority -> VarChar,
        status -> VarChar,
        payload -> Jsonb,
        result -> Nullable<Jsonb>,
        progress -> Integer,
        progress_message -> Nullable<VarChar>,
        retry_count -> Integer,
        max_retries -> Integer,
        last_error -> Nullable<Text>,
        worker_id -> Nullable<VarChar>,
        lease_expires_at -> Nullable<Timestamp>,
        scheduled_at -> Timestamp,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

table! {
    schema_migrations (version) {
        version -> VarChar,
        name -> VarChar,
        applied_at -> Timestamp,
    }
}

table! {
    store_identity (store_id) {
        store_id -> Uuid,
        slug -> VarChar,
        bound_at -> Timestamp,
    }
}

joinable!(jobs -> stores (store_id));
joinable!(store_databases -> stores (store_id));

allow_tables_to_appear_in_same_query!(stores, store_databases, jobs);
