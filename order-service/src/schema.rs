diesel::table! {
    orders (id) {
        id -> Uuid,
        user_id -> Uuid,
        order_time -> Timestamptz,
        total_amount -> Numeric,
        status -> Varchar,
        shipping_address -> Varchar,
        payment_method -> Varchar,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (order_id, product_id) {
        order_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        price_at_time_of_order -> Numeric,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    reconciliation_flags (id) {
        id -> Uuid,
        order_id -> Uuid,
        action -> Varchar,
        product_id -> Uuid,
        quantity -> Int4,
        reason -> Varchar,
        resolved -> Bool,
        created_at -> Timestamptz,
        resolved_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(order_items -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    orders,
    order_items,
    outbox_events,
    reconciliation_flags,
);
