use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Admin,
    DataEntry,
    Partners,
}

impl Role {
    /// Arabic display label.
    pub fn label(&self) -> &'static str {
        match self {
            Role::Admin => "مدير النظام",
            Role::DataEntry => "مدخل بيانات",
            Role::Partners => "الشركاء",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_snake_case_names() {
        assert_eq!(Role::from_str("admin").unwrap(), Role::Admin);
        assert_eq!(Role::from_str("data_entry").unwrap(), Role::DataEntry);
        assert_eq!(Role::from_str("partners").unwrap(), Role::Partners);
        assert!(Role::from_str("hr").is_err());
        assert!(Role::from_str("Admin").is_err());
    }

    #[test]
    fn serde_and_strum_agree() {
        let json = serde_json::to_string(&Role::DataEntry).unwrap();
        assert_eq!(json, "\"data_entry\"");
        assert_eq!(Role::DataEntry.as_ref(), "data_entry");
        assert_eq!(Role::Partners.to_string(), "partners");
    }
}
