use bytes::{Buf, BufMut, BytesMut};

use super::frame::Frame;

pub const HEARTBEAT_ID: u32 = 0;
pub const REQUEST_DATA_STREAM_ID: u32 = 66;
pub const TIMESYNC_ID: u32 = 111;

const HEARTBEAT_LEN: usize = 9;
const REQUEST_DATA_STREAM_LEN: usize = 6;
/// TIMESYNC including its two MAVLink 2 extension bytes
const TIMESYNC_LEN: usize = 18;

const MAV_TYPE_GCS: u8 = 6;
const MAV_AUTOPILOT_INVALID: u8 = 8;
const MAV_STATE_ACTIVE: u8 = 4;

/// Messages the monitor sends or interprets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Keep-alive and presence announcement
    Heartbeat(Heartbeat),
    /// Round-trip time probe and its reply
    Timesync(Timesync),
    /// Ask the autopilot to stream a data group at a given rate
    RequestDataStream(RequestDataStream),
}

impl Message {
    pub fn id(&self) -> u32 {
        match self {
            Message::Heartbeat(_) => HEARTBEAT_ID,
            Message::Timesync(_) => TIMESYNC_ID,
            Message::RequestDataStream(_) => REQUEST_DATA_STREAM_ID,
        }
    }

    /// Full-length payload, before any MAVLink 2 truncation
    pub fn payload(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(TIMESYNC_LEN);
        match self {
            Message::Heartbeat(hb) => {
                buf.put_u32_le(hb.custom_mode);
                buf.put_u8(hb.mav_type);
                buf.put_u8(hb.autopilot);
                buf.put_u8(hb.base_mode);
                buf.put_u8(hb.system_status);
                buf.put_u8(hb.mavlink_version);
            }
            Message::Timesync(ts) => {
                buf.put_i64_le(ts.tc1);
                buf.put_i64_le(ts.ts1);
                buf.put_u8(ts.target_system);
                buf.put_u8(ts.target_component);
            }
            Message::RequestDataStream(req) => {
                buf.put_u16_le(req.rate_hz);
                buf.put_u8(req.target_system);
                buf.put_u8(req.target_component);
                buf.put_u8(req.stream.id());
                buf.put_u8(req.start as u8);
            }
        }
        buf
    }

    /// Interprets a frame, `None` for message ids the monitor does not use
    pub fn parse(frame: &Frame) -> Option<Message> {
        match frame.message_id {
            HEARTBEAT_ID => {
                let mut p = frame.payload_padded(HEARTBEAT_LEN);
                Some(Message::Heartbeat(Heartbeat {
                    custom_mode: p.get_u32_le(),
                    mav_type: p.get_u8(),
                    autopilot: p.get_u8(),
                    base_mode: p.get_u8(),
                    system_status: p.get_u8(),
                    mavlink_version: p.get_u8(),
                }))
            }
            TIMESYNC_ID => {
                let mut p = frame.payload_padded(TIMESYNC_LEN);
                Some(Message::Timesync(Timesync {
                    tc1: p.get_i64_le(),
                    ts1: p.get_i64_le(),
                    target_system: p.get_u8(),
                    target_component: p.get_u8(),
                }))
            }
            REQUEST_DATA_STREAM_ID => {
                let mut p = frame.payload_padded(REQUEST_DATA_STREAM_LEN);
                let rate_hz = p.get_u16_le();
                let target_system = p.get_u8();
                let target_component = p.get_u8();
                let stream = DataStream::from_id(p.get_u8())?;
                Some(Message::RequestDataStream(RequestDataStream {
                    target_system,
                    target_component,
                    stream,
                    rate_hz,
                    start: p.get_u8() != 0,
                }))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

impl Heartbeat {
    /// Heartbeat announcing an active ground station
    pub fn ground_station() -> Self {
        Heartbeat {
            custom_mode: 0,
            mav_type: MAV_TYPE_GCS,
            autopilot: MAV_AUTOPILOT_INVALID,
            base_mode: 0,
            system_status: MAV_STATE_ACTIVE,
            mavlink_version: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timesync {
    /// Responder's clock, zero in a request
    pub tc1: i64,
    /// Requester's clock, echoed back in the reply
    pub ts1: i64,
    pub target_system: u8,
    pub target_component: u8,
}

impl Timesync {
    /// Request carrying the local wall-clock time in nanoseconds
    pub fn probe(ts1: i64, target_system: u8, target_component: u8) -> Self {
        Timesync {
            tc1: 0,
            ts1,
            target_system,
            target_component,
        }
    }

    /// A reply carries the responder's time in `tc1`
    pub fn is_reply(&self) -> bool {
        self.tc1 != 0
    }
}

/// Data stream groups understood by REQUEST_DATA_STREAM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataStream {
    RawSensors,
    ExtendedStatus,
    RcChannels,
    Position,
    Extra1,
    Extra2,
    Extra3,
}

impl DataStream {
    pub fn id(&self) -> u8 {
        match self {
            DataStream::RawSensors => 1,
            DataStream::ExtendedStatus => 2,
            DataStream::RcChannels => 3,
            DataStream::Position => 6,
            DataStream::Extra1 => 10,
            DataStream::Extra2 => 11,
            DataStream::Extra3 => 12,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(DataStream::RawSensors),
            2 => Some(DataStream::ExtendedStatus),
            3 => Some(DataStream::RcChannels),
            6 => Some(DataStream::Position),
            10 => Some(DataStream::Extra1),
            11 => Some(DataStream::Extra2),
            12 => Some(DataStream::Extra3),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataStream::RawSensors => "RAW_SENSORS",
            DataStream::ExtendedStatus => "EXTENDED_STATUS",
            DataStream::RcChannels => "RC_CHANNELS",
            DataStream::Position => "POSITION",
            DataStream::Extra1 => "EXTRA1",
            DataStream::Extra2 => "EXTRA2",
            DataStream::Extra3 => "EXTRA3",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDataStream {
    pub target_system: u8,
    pub target_component: u8,
    pub stream: DataStream,
    pub rate_hz: u16,
    pub start: bool,
}
