use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Driver record. Linked to its user account only through the phone number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct Driver {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub available: bool, // offline until the driver opts in
}

#[derive(Debug, Clone)]
pub struct NewDriver {
    pub name: String,
    pub phone: String,
}
