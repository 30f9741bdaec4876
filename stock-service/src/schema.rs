diesel::table! {
    stock (product_id) {
        product_id -> Varchar,
        quantity -> Int8,
        reserved -> Int8,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}
