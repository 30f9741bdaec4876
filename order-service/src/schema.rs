diesel::table! {
    orders (id) {
        id -> Varchar,
        customer_id -> Varchar,
        status -> Varchar,
        payment_link -> Varchar,
        items -> Jsonb,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}
