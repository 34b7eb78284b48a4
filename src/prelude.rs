pub use std::{collections::HashMap, sync::Arc, time::Duration};

pub use chrono::{NaiveDateTime as DateTime, Utc};
pub use dashmap::DashMap;
pub use sea_orm::{
  ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, ConnectionTrait,
  Database, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
  QueryOrder, Set, TransactionTrait,
};
pub use tracing::{debug, error, info, trace, warn};

pub use crate::error::{Error, Result};
