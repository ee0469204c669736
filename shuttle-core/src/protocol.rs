//! Shuttle message model: message types, flat field mappings and the typed records carried in them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Dictionary header overhead on the peer (tuple count).
const DICT_HEADER_SIZE: usize = 1;
/// Per-field overhead on the peer (key + type + length).
const TUPLE_HEADER_SIZE: usize = 7;

/// Closed set of message types. Wire value is the `message_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Status = 0,
    SetInboxSize = 1,
    Routes = 2,
    RoutePattern = 3,
    RoutePatternPoints = 4,
    RoutePatternStops = 5,
}

impl MessageType {
    pub fn from_wire(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Status),
            1 => Some(Self::SetInboxSize),
            2 => Some(Self::Routes),
            3 => Some(Self::RoutePattern),
            4 => Some(Self::RoutePatternPoints),
            5 => Some(Self::RoutePatternStops),
            _ => None,
        }
    }

    pub fn as_wire(self) -> u8 {
        self as u8
    }
}

/// Field keys understood by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    MessageType,
    JsStatus,
    InboxSize,
    RouteName,
    RouteType,
    RouteShortName,
    RouteColorR,
    RouteColorG,
    RouteColorB,
    PointX,
    PointY,
    PointIsStop,
    StopName,
    StopIsTimed,
    StopPointIndex,
    ListIndex,
    ListLen,
}

impl Key {
    pub fn name(self) -> &'static str {
        match self {
            Key::MessageType => "message_type",
            Key::JsStatus => "js_status",
            Key::InboxSize => "inbox_size",
            Key::RouteName => "route_name",
            Key::RouteType => "route_type",
            Key::RouteShortName => "route_short_name",
            Key::RouteColorR => "route_color_r",
            Key::RouteColorG => "route_color_g",
            Key::RouteColorB => "route_color_b",
            Key::PointX => "point_x",
            Key::PointY => "point_y",
            Key::PointIsStop => "point_is_stop",
            Key::StopName => "stop_name",
            Key::StopIsTimed => "stop_is_timed",
            Key::StopPointIndex => "stop_point_index",
            Key::ListIndex => "list_index",
            Key::ListLen => "list_len",
        }
    }

    /// Text shown to the user and nothing else; safe to shorten. Identifiers such as
    /// `route_short_name` tie points and stops to their route and must arrive intact.
    pub fn is_display(self) -> bool {
        matches!(self, Key::RouteName | Key::StopName)
    }
}

/// A primitive field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    U8(u8),
    U32(u32),
    I32(i32),
    Str(String),
}

impl Value {
    /// Unsigned view of an integer value; negative I32 and strings yield None.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U8(v) => Some(u32::from(*v)),
            Value::U32(v) => Some(*v),
            Value::I32(v) => u32::try_from(*v).ok(),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Bytes the value occupies in the peer's dictionary. Strings are NUL-terminated.
    fn encoded_len(&self) -> usize {
        match self {
            Value::U8(_) => 1,
            Value::U32(_) | Value::I32(_) => 4,
            Value::Str(s) => s.len() + 1,
        }
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::U8(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::U8(u8::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// One logical message: a flat mapping of field keys to primitive values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMessage {
    fields: BTreeMap<Key, Value>,
}

impl AppMessage {
    /// Empty message tagged with its type.
    pub fn new(kind: MessageType) -> Self {
        let mut msg = Self::default();
        msg.insert(Key::MessageType, kind.as_wire());
        msg
    }

    /// Builder-style insert.
    pub fn with(mut self, key: Key, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: Key, value: impl Into<Value>) {
        self.fields.insert(key, value.into());
    }

    pub fn get(&self, key: Key) -> Option<&Value> {
        self.fields.get(&key)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.fields.contains_key(&key)
    }

    /// Decoded `message_type` field, if present and known.
    pub fn message_type(&self) -> Option<MessageType> {
        self.get(Key::MessageType)
            .and_then(Value::as_u32)
            .and_then(MessageType::from_wire)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.fields.iter()
    }

    /// Estimated size of this message in the peer's inbox.
    pub fn payload_size(&self) -> usize {
        DICT_HEADER_SIZE
            + self
                .fields
                .values()
                .map(|v| TUPLE_HEADER_SIZE + v.encoded_len())
                .sum::<usize>()
    }

    /// The longest non-empty display string, for shrinking to capacity.
    pub(crate) fn longest_str_mut(&mut self) -> Option<(Key, &mut String)> {
        self.fields
            .iter_mut()
            .filter_map(|(k, v)| match v {
                Value::Str(s) if k.is_display() && !s.is_empty() => Some((*k, s)),
                _ => None,
            })
            .max_by_key(|(_, s)| s.len())
    }
}

/// Route category. Wire value is `route_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum RouteType {
    OnCampus = 0,
    OffCampus = 1,
    GameDay = 2,
    Other = 3,
}

impl RouteType {
    /// All categories in wire order.
    pub const ALL: [RouteType; 4] = [
        RouteType::OnCampus,
        RouteType::OffCampus,
        RouteType::GameDay,
        RouteType::Other,
    ];

    pub fn as_wire(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    pub route_type: RouteType,
    pub short_name: String,
    /// None means the color fields are not sent at all.
    pub color: Option<Rgb>,
}

/// One point of a route pattern in normalized fixed-point coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternPoint {
    pub route_short_name: String,
    pub x: i32,
    pub y: i32,
    pub is_stop: bool,
    /// Set only for stops.
    pub stop_name: Option<String>,
    /// Set only for stops.
    pub is_timed: Option<bool>,
}

/// A stop, referencing its position in the point sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternStop {
    pub route_short_name: String,
    pub name: String,
    pub is_timed: bool,
    pub point_index: u32,
}

/// Transport-ready record. Converts to exactly one [`AppMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Route(Route),
    Point(PatternPoint),
    Stop(PatternStop),
}

impl Record {
    pub fn to_message(&self) -> AppMessage {
        match self {
            Record::Route(r) => {
                let mut msg = AppMessage::new(MessageType::Routes)
                    .with(Key::RouteName, r.name.as_str())
                    .with(Key::RouteType, r.route_type.as_wire())
                    .with(Key::RouteShortName, r.short_name.as_str());
                if let Some(c) = r.color {
                    msg.insert(Key::RouteColorR, c.r);
                    msg.insert(Key::RouteColorG, c.g);
                    msg.insert(Key::RouteColorB, c.b);
                }
                msg
            }
            Record::Point(p) => {
                let mut msg = AppMessage::new(MessageType::RoutePatternPoints)
                    .with(Key::RouteShortName, p.route_short_name.as_str())
                    .with(Key::PointX, p.x)
                    .with(Key::PointY, p.y)
                    .with(Key::PointIsStop, p.is_stop);
                if let Some(name) = &p.stop_name {
                    msg.insert(Key::StopName, name.as_str());
                }
                if let Some(timed) = p.is_timed {
                    msg.insert(Key::StopIsTimed, timed);
                }
                msg
            }
            Record::Stop(s) => AppMessage::new(MessageType::RoutePatternStops)
                .with(Key::RouteShortName, s.route_short_name.as_str())
                .with(Key::StopName, s.name.as_str())
                .with(Key::StopIsTimed, s.is_timed)
                .with(Key::StopPointIndex, s.point_index),
        }
    }
}

/// `js_status` value carried by status messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionStatus {
    /// Inbox size has been received and applied.
    InboxUpdated = 0,
    /// Relay is up and waiting for the peer's inbox size.
    Ready = 1,
}

/// Status handshake message.
pub fn status_message(status: SessionStatus) -> AppMessage {
    AppMessage::new(MessageType::Status).with(Key::JsStatus, status as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_without_color_omits_color_fields() {
        let rec = Record::Route(Route {
            name: "12 Bus".into(),
            route_type: RouteType::OnCampus,
            short_name: "12".into(),
            color: None,
        });
        let msg = rec.to_message();
        assert_eq!(msg.message_type(), Some(MessageType::Routes));
        assert!(!msg.contains(Key::RouteColorR));
        assert!(!msg.contains(Key::RouteColorG));
        assert!(!msg.contains(Key::RouteColorB));
        assert_eq!(msg.get(Key::RouteType), Some(&Value::U8(0)));
    }

    #[test]
    fn route_with_color_sends_three_channels() {
        let rec = Record::Route(Route {
            name: "12 Bus".into(),
            route_type: RouteType::OffCampus,
            short_name: "12".into(),
            color: Some(Rgb { r: 255, g: 0, b: 7 }),
        });
        let msg = rec.to_message();
        assert_eq!(msg.get(Key::RouteColorR), Some(&Value::U8(255)));
        assert_eq!(msg.get(Key::RouteColorG), Some(&Value::U8(0)));
        assert_eq!(msg.get(Key::RouteColorB), Some(&Value::U8(7)));
    }

    #[test]
    fn stop_point_carries_name_and_timing() {
        let plain = PatternPoint {
            route_short_name: "12".into(),
            x: 3,
            y: 4,
            is_stop: false,
            stop_name: None,
            is_timed: None,
        };
        let msg = Record::Point(plain.clone()).to_message();
        assert_eq!(msg.get(Key::PointIsStop), Some(&Value::U8(0)));
        assert!(!msg.contains(Key::StopName));
        assert!(!msg.contains(Key::StopIsTimed));

        let stop = PatternPoint {
            is_stop: true,
            stop_name: Some("MSC".into()),
            is_timed: Some(true),
            ..plain
        };
        let msg = Record::Point(stop).to_message();
        assert_eq!(msg.get(Key::PointIsStop), Some(&Value::U8(1)));
        assert_eq!(msg.get(Key::StopName), Some(&Value::Str("MSC".into())));
        assert_eq!(msg.get(Key::StopIsTimed), Some(&Value::U8(1)));
        assert_eq!(msg.get(Key::PointX), Some(&Value::I32(3)));
    }

    #[test]
    fn payload_size_counts_headers_and_nul() {
        // 1 header + (7 + 1) message_type + (7 + 3) "ab\0"
        let msg = AppMessage::new(MessageType::Routes).with(Key::RouteName, "ab");
        assert_eq!(msg.payload_size(), 1 + 8 + 10);
    }

    #[test]
    fn message_type_roundtrips_through_wire_value() {
        for v in 0..6u32 {
            let t = MessageType::from_wire(v).unwrap();
            assert_eq!(u32::from(t.as_wire()), v);
        }
        assert_eq!(MessageType::from_wire(6), None);
    }

    #[test]
    fn negative_int_is_not_unsigned() {
        assert_eq!(Value::I32(-1).as_u32(), None);
        assert_eq!(Value::I32(5).as_u32(), Some(5));
        assert_eq!(Value::Str("5".into()).as_u32(), None);
    }

    #[test]
    fn status_message_carries_status() {
        let msg = status_message(SessionStatus::Ready);
        assert_eq!(msg.message_type(), Some(MessageType::Status));
        assert_eq!(msg.get(Key::JsStatus), Some(&Value::U8(1)));
    }
}
