diesel::table! {
    payments (id) {
        id -> Uuid,
        order_id -> Uuid,
        transaction_ref -> Varchar,
        amount -> Numeric,
        payment_method -> Varchar,
        status -> Varchar,
        failure_reason -> Nullable<Varchar>,
        payment_date -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}
