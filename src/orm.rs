#[allow(warnings, clippy::all)]
pub(crate) mod short_url {
    use sea_orm::entity::prelude::*;

    #[sea_orm::model]
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "urls")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        #[sea_orm(column_type = "String(StringLen::N(2048))")]
        pub original_url: String,
        #[sea_orm(unique, indexed, column_type = "String(StringLen::N(6))")]
        pub short_code: String,
        pub created_at: TimeDateTimeWithTimeZone,
        #[sea_orm(default_value = 0)]
        pub hit_count: i64,
    }

    impl ActiveModelBehavior for ActiveModel {}
}
