//! Push payload rendering and notification click routing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::NotificationConfig;
use crate::error::EngineResult;
use crate::platform::{ClientKind, Platform};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  /// Sender-defined: epoch millis, ISO string or anything else
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timestamp: Option<Value>,
  /// Any other keys the sender attached
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A rendered notification: defaults shallow-merged with the push payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

/// What a notification click resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  Dismissed,
  Focused { client_id: String, url: String },
  Opened { url: String },
}

/// A user interaction with a shown notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationClick {
  /// Empty or `None` for a click on the notification body
  pub action: Option<String>,
  pub notification: Notification,
}

/// Drop `data` fields of the wrong shape so the rest of the object (the
/// deep link in particular) survives the merge.
fn sanitize_data(value: Value) -> Value {
  let Value::Object(mut data) = value else {
    return value;
  };
  if data.get("url").is_some_and(|url| !url.is_string() && !url.is_null()) {
    warn!("Ignoring non-string data.url in push payload");
    data.remove("url");
  }
  Value::Object(data)
}

/// Known actions and the routes they lead to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ClickAction {
  Dismiss,
  LogMood,
  ViewInsights,
  Crisis,
  Default,
}

impl ClickAction {
  fn parse(action: Option<&str>) -> Self {
    match action.unwrap_or_default() {
      "dismiss" => Self::Dismiss,
      "log-mood" => Self::LogMood,
      "view-insights" => Self::ViewInsights,
      "crisis" => Self::Crisis,
      "" => Self::Default,
      other => {
        debug!(action = other, "Unknown notification action, using default target");
        Self::Default
      }
    }
  }

  fn route(&self) -> Option<&'static str> {
    match self {
      Self::LogMood => Some("/mood"),
      Self::ViewInsights => Some("/insights"),
      Self::Crisis => Some("/crisis"),
      Self::Dismiss | Self::Default => None,
    }
  }
}

/// Renders push payloads and routes clicks back into the application.
#[derive(Debug, Clone)]
pub struct PushRouter {
  defaults: NotificationConfig,
}

impl PushRouter {
  pub fn new(defaults: NotificationConfig) -> Self {
    Self { defaults }
  }

  fn default_value(&self) -> Value {
    json!({
      "title": self.defaults.title,
      "body": self.defaults.body,
      "icon": self.defaults.icon,
      "badge": self.defaults.badge,
      "data": {
        "url": self.defaults.default_url,
        "timestamp": Utc::now().timestamp_millis(),
      },
      "actions": [
        { "action": "log-mood", "title": "Log mood" },
        { "action": "dismiss", "title": "Dismiss" },
      ],
    })
  }

  /// Build the notification for a raw push payload.
  ///
  /// Payload keys replace default keys one level deep. A payload that is
  /// not JSON, not an object, or has a key of the wrong shape falls back to
  /// the defaults for that part.
  pub fn render(&self, payload: Option<&[u8]>) -> Notification {
    let defaults = self.default_value();
    let mut merged = match defaults.as_object() {
      Some(map) => map.clone(),
      None => Map::new(),
    };

    let overrides = match payload.map(serde_json::from_slice::<Value>) {
      Some(Ok(Value::Object(map))) => map,
      Some(Ok(_)) | Some(Err(_)) => {
        warn!("Push payload is not a JSON object, using defaults");
        Map::new()
      }
      None => Map::new(),
    };

    for (key, mut value) in overrides {
      if key == "data" {
        value = sanitize_data(value);
      }
      let previous = merged.insert(key.clone(), value);
      if serde_json::from_value::<Notification>(Value::Object(merged.clone())).is_err() {
        warn!(key = %key, "Ignoring malformed push payload field");
        match previous {
          Some(previous) => merged.insert(key, previous),
          None => merged.remove(&key),
        };
      }
    }

    serde_json::from_value(Value::Object(merged)).unwrap_or_else(|_| self.fallback())
  }

  fn fallback(&self) -> Notification {
    Notification {
      title: self.defaults.title.clone(),
      body: self.defaults.body.clone(),
      icon: self.defaults.icon.clone(),
      badge: self.defaults.badge.clone(),
      data: NotificationData {
        url: Some(self.defaults.default_url.clone()),
        timestamp: Some(json!(Utc::now().timestamp_millis())),
        extra: Map::new(),
      },
      actions: Vec::new(),
    }
  }

  /// Render and show a notification for a push payload.
  pub async fn show(
    &self,
    platform: &dyn Platform,
    payload: Option<&[u8]>,
  ) -> EngineResult<Notification> {
    let notification = self.render(payload);
    platform.show_notification(&notification).await?;
    Ok(notification)
  }

  /// Target URL for a click, or `None` when the click dismisses.
  pub fn target(&self, click: &NotificationClick) -> Option<String> {
    let action = ClickAction::parse(click.action.as_deref());
    match action {
      ClickAction::Dismiss => None,
      ClickAction::Default => Some(
        click
          .notification
          .data
          .url
          .clone()
          .unwrap_or_else(|| self.defaults.default_url.clone()),
      ),
      known => known.route().map(String::from),
    }
  }

  /// Close the notification, then focus a matching window or open one.
  pub async fn click(
    &self,
    platform: &dyn Platform,
    click: &NotificationClick,
  ) -> EngineResult<ClickOutcome> {
    if let Err(e) = platform.close_notification(&click.notification).await {
      warn!(error = %e, "Failed to close notification");
    }

    let Some(url) = self.target(click) else {
      return Ok(ClickOutcome::Dismissed);
    };

    let clients = platform.clients().await?;
    if let Some(client) = clients
      .iter()
      .find(|c| c.kind == ClientKind::Window && c.url.contains(url.as_str()))
    {
      platform.focus(&client.id).await?;
      return Ok(ClickOutcome::Focused {
        client_id: client.id.clone(),
        url,
      });
    }

    platform.open_window(&url).await?;
    Ok(ClickOutcome::Opened { url })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::{ClientInfo, LocalPlatform};

  fn router() -> PushRouter {
    PushRouter::new(NotificationConfig::default())
  }

  fn click(action: Option<&str>, url: Option<&str>) -> NotificationClick {
    let mut notification = router().render(None);
    notification.data.url = url.map(String::from);
    NotificationClick {
      action: action.map(String::from),
      notification,
    }
  }

  #[test]
  fn test_defaults_without_payload() {
    let n = router().render(None);
    assert_eq!(n.title, "MoodSync");
    assert_eq!(n.body, "Time to check in with your mood");
    assert_eq!(n.data.url.as_deref(), Some("/"));
    assert!(n.data.timestamp.is_some());
    assert_eq!(n.actions.len(), 2);
  }

  #[test]
  fn test_payload_wins_shallow() {
    let payload = br#"{"body":"Your weekly insights are ready","data":{"url":"/insights"}}"#;
    let n = router().render(Some(payload));
    assert_eq!(n.title, "MoodSync");
    assert_eq!(n.body, "Your weekly insights are ready");
    assert_eq!(n.data.url.as_deref(), Some("/insights"));
    // Shallow: the payload's data object replaces the default one wholesale
    assert_eq!(n.data.timestamp, None);
  }

  #[test]
  fn test_malformed_payload_uses_defaults() {
    let n = router().render(Some(b"not json"));
    assert_eq!(n.body, "Time to check in with your mood");

    let n = router().render(Some(br#"{"title":"Hi","actions":"nope"}"#));
    assert_eq!(n.title, "Hi");
    assert_eq!(n.actions.len(), 2);
  }

  #[test]
  fn test_deep_link_survives_any_timestamp_shape() {
    let n = router().render(Some(
      br#"{"data":{"url":"/insights","timestamp":"2026-10-19T08:00:00Z"}}"#,
    ));
    assert_eq!(n.data.url.as_deref(), Some("/insights"));
    assert_eq!(n.data.timestamp, Some(json!("2026-10-19T08:00:00Z")));

    let n = router().render(Some(br#"{"data":{"url":"/crisis","timestamp":1760860800.5}}"#));
    let click = NotificationClick {
      action: None,
      notification: n,
    };
    assert_eq!(router().target(&click), Some("/crisis".to_string()));
  }

  #[test]
  fn test_bad_data_url_keeps_other_data_fields() {
    let n = router().render(Some(br#"{"data":{"url":42,"moodId":"m7"}}"#));
    assert_eq!(n.data.url, None);
    assert_eq!(n.data.extra.get("moodId"), Some(&json!("m7")));
  }

  #[test]
  fn test_click_targets() {
    let r = router();
    assert_eq!(r.target(&click(Some("dismiss"), Some("/x"))), None);
    assert_eq!(r.target(&click(Some("log-mood"), None)), Some("/mood".to_string()));
    assert_eq!(r.target(&click(None, Some("/insights"))), Some("/insights".to_string()));
    assert_eq!(r.target(&click(Some(""), None)), Some("/".to_string()));
    assert_eq!(r.target(&click(Some("snooze"), Some("/a"))), Some("/a".to_string()));
  }

  #[tokio::test]
  async fn test_click_focuses_existing_window() {
    let platform = LocalPlatform::with_clients(vec![
      ClientInfo {
        id: "w1".to_string(),
        url: "http://localhost:3000/dashboard".to_string(),
        kind: ClientKind::Window,
      },
      ClientInfo {
        id: "w2".to_string(),
        url: "http://localhost:3000/mood".to_string(),
        kind: ClientKind::Window,
      },
    ]);

    let outcome = router()
      .click(&platform, &click(Some("log-mood"), None))
      .await
      .unwrap();

    assert_eq!(
      outcome,
      ClickOutcome::Focused {
        client_id: "w2".to_string(),
        url: "/mood".to_string()
      }
    );
    let state = platform.snapshot();
    assert!(state.opened.is_empty());
    assert_eq!(state.closed, 1);
  }

  #[tokio::test]
  async fn test_click_opens_when_no_match() {
    let platform = LocalPlatform::with_clients(vec![ClientInfo {
      id: "sw".to_string(),
      url: "http://localhost:3000/insights".to_string(),
      kind: ClientKind::Worker,
    }]);

    let outcome = router()
      .click(&platform, &click(None, Some("/insights")))
      .await
      .unwrap();

    assert_eq!(
      outcome,
      ClickOutcome::Opened {
        url: "/insights".to_string()
      }
    );
    assert_eq!(platform.snapshot().opened, vec!["/insights".to_string()]);
  }

  #[tokio::test]
  async fn test_dismiss_only_closes() {
    let platform = LocalPlatform::new();
    let outcome = router()
      .click(&platform, &click(Some("dismiss"), None))
      .await
      .unwrap();
    assert_eq!(outcome, ClickOutcome::Dismissed);
    let state = platform.snapshot();
    assert_eq!(state.closed, 1);
    assert!(state.opened.is_empty() && state.focused.is_empty());
  }
}
