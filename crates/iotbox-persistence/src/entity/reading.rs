//! `SeaORM` Entity for reading table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "reading")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub port: i32,
    pub time: DateTime,
    pub sensor: String,
    #[sea_orm(column_type = "Text")]
    pub ips: String,
    #[sea_orm(column_type = "Text")]
    pub readings: String,
    #[sea_orm(column_type = "Text")]
    pub lower_limits: String,
    #[sea_orm(column_type = "Text")]
    pub upper_limits: String,
    #[sea_orm(column_type = "Text")]
    pub units: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
