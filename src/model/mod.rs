use serde::{Deserialize, Deserializer, Serialize};

pub const INDEX_SCENARIO: i32 = 590;
pub const INDEX_LIGHT_START: i32 = 605;
pub const INDEX_LIGHT_END: i32 = 622;
pub const MAX_EXCHANGE_INDEX: i32 = 999;

pub fn is_valid_index(index: i32) -> bool {
    (0..=MAX_EXCHANGE_INDEX).contains(&index)
}

pub fn in_light_band(index: i32) -> bool {
    (INDEX_LIGHT_START..=INDEX_LIGHT_END).contains(&index)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeKv {
    pub k: i32,
    #[serde(deserialize_with = "lenient_value")]
    pub v: String,
}

impl ExchangeKv {
    pub fn new(k: i32, v: impl Into<String>) -> Self {
        Self { k, v: v.into() }
    }
}

// The controller firmware sometimes emits bare numbers for values.
fn lenient_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(if b { "1" } else { "0" }.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number value, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfoResponse {
    pub isconnected: bool,
    pub infos: Vec<i32>,
    pub newversion: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusRequest {
    pub version: String,
    pub ek: Vec<ExchangeKv>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub guid: String,
    pub params: Vec<ExchangeKv>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmCommand {
    pub guid: String,
    pub obl: String,
}

// The controller scans for "_de67f" before "actions"; keep this field order
// and never skip the alarm slot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionsResponse {
    #[serde(rename = "_de67f")]
    pub alarm: Option<AlarmCommand>,
    pub actions: Vec<Action>,
}

impl ActionsResponse {
    pub fn pending(actions: Vec<Action>) -> Self {
        Self {
            alarm: None,
            actions,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InjectResponse {
    pub status: &'static str,
    pub guid: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InjectPayload {
    Many(Vec<ExchangeKv>),
    One(ExchangeKv),
}

impl InjectPayload {
    pub fn into_params(self) -> Vec<ExchangeKv> {
        match self {
            Self::Many(params) => params,
            Self::One(param) => vec![param],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_response_puts_alarm_field_first() {
        let response = ActionsResponse::pending(vec![
            Action {
                guid: "a".to_string(),
                params: vec![ExchangeKv::new(1, "1")],
            },
            Action {
                guid: "b".to_string(),
                params: vec![],
            },
        ]);
        let text = serde_json::to_string(&response).unwrap();
        let alarm = text.find("\"_de67f\"").unwrap();
        let actions = text.find("\"actions\"").unwrap();
        assert!(alarm < actions);
        assert!(text.starts_with("{\"_de67f\":null,\"actions\":["));
    }

    #[test]
    fn empty_actions_render_as_empty_array() {
        let text = serde_json::to_string(&ActionsResponse::default()).unwrap();
        assert_eq!(text, "{\"_de67f\":null,\"actions\":[]}");
    }

    #[test]
    fn exchange_value_accepts_numbers() {
        let kv: ExchangeKv = serde_json::from_str(r#"{"k":12,"v":34}"#).unwrap();
        assert_eq!(kv, ExchangeKv::new(12, "34"));
    }

    #[test]
    fn exchange_value_rejects_objects() {
        assert!(serde_json::from_str::<ExchangeKv>(r#"{"k":12,"v":{}}"#).is_err());
    }

    #[test]
    fn inject_payload_accepts_object_or_array() {
        let one: InjectPayload = serde_json::from_str(r#"{"k":613,"v":"64"}"#).unwrap();
        assert_eq!(one.into_params(), vec![ExchangeKv::new(613, "64")]);

        let many: InjectPayload =
            serde_json::from_str(r#"[{"k":613,"v":"64"},{"k":590,"v":"2"}]"#).unwrap();
        assert_eq!(many.into_params().len(), 2);
    }

    #[test]
    fn index_helpers_cover_bounds() {
        assert!(is_valid_index(0));
        assert!(is_valid_index(999));
        assert!(!is_valid_index(-1));
        assert!(!is_valid_index(1000));
        assert!(in_light_band(605));
        assert!(in_light_band(622));
        assert!(!in_light_band(604));
        assert!(!in_light_band(623));
    }
}
