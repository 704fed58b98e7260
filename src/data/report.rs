//! Report objects.
//!
//! Check bodies describe what they inspected as a list of compliant and a
//! list of non-compliant objects. The engine renders both lists as JSON and
//! stores the text as the check details.

use serde::{Deserialize, Serialize};

pub const REASON_FOR_COMPLIANCE: &str = "Reason For Compliance";
pub const REASON_FOR_NON_COMPLIANCE: &str = "Reason For Non Compliance";

/// An inspected object and the key/value facts a check found about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportObject {
    #[serde(rename = "ObjectType")]
    pub object_type: String,
    #[serde(rename = "ObjectFieldsKeys")]
    pub keys: Vec<String>,
    #[serde(rename = "ObjectFieldsValues")]
    pub values: Vec<String>,
}

impl ReportObject {
    /// New object with its compliance reason as the first field.
    pub fn new(object_type: &str, reason: &str, compliant: bool) -> Self {
        let key = if compliant {
            REASON_FOR_COMPLIANCE
        } else {
            REASON_FOR_NON_COMPLIANCE
        };
        ReportObject {
            object_type: object_type.to_string(),
            keys: vec![key.to_string()],
            values: vec![reason.to_string()],
        }
    }

    pub fn with_field(mut self, key: &str, value: impl ToString) -> Self {
        self.keys.push(key.to_string());
        self.values.push(value.to_string());
        self
    }

    pub fn node(node: &str, reason: &str, compliant: bool) -> Self {
        ReportObject::new("Node", reason, compliant).with_field("Node Name", node)
    }

    pub fn kernel_taint(node: &str, reason: &str, compliant: bool) -> Self {
        ReportObject::new("Taint", reason, compliant).with_field("Node Name", node)
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }
}

#[derive(Serialize)]
struct ResultObjects<'a> {
    #[serde(rename = "CompliantObjectsOut")]
    compliant: &'a [ReportObject],
    #[serde(rename = "NonCompliantObjectsOut")]
    non_compliant: &'a [ReportObject],
}

/// Render both lists as a single JSON document.
pub fn result_objects_to_string(
    compliant: &[ReportObject],
    non_compliant: &[ReportObject],
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ResultObjects {
        compliant,
        non_compliant,
    })
}
