//! Download listing query

use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::db::downloads::{self, DEFAULT_LIST_LIMIT};
use crate::db::{DbError, DownloadRecord};

const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListExportsQuery {
    pub user_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListExportsResponse {
    pub items: Vec<DownloadRecord>,
}

impl Request<Result<ListExportsResponse, DbError>> for ListExportsQuery {}

impl ListExportsQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

pub async fn handle(pool: &PgPool, query: ListExportsQuery) -> Result<ListExportsResponse, DbError> {
    let items = downloads::list_for_user(pool, query.user_id, query.limit()).await?;
    Ok(ListExportsResponse { items })
}
