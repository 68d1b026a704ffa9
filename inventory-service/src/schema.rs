diesel::table! {
    inventory (product_id) {
        product_id -> Uuid,
        available_quantity -> Int4,
        reserved_quantity -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    reservations (order_id, product_id) {
        order_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(reservations -> inventory (product_id));

diesel::allow_tables_to_appear_in_same_query!(
    inventory,
    reservations,
);
