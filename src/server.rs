//! Binary TCP protocol.
//!
//! Every request is a frame `[OpCode (1b)][Length u32 LE (4b)][Body]`.
//! Several frames may be sent on one connection. Responses:
//!
//! | op           | body                                  | response                                                        |
//! |--------------|---------------------------------------|-----------------------------------------------------------------|
//! | `RECORD`     | `[lat f64][lng f64][identity]`        | `OK`, `ER`, or `CD` + `[allowed_at u64]` during cooldown        |
//! | `FIRST_SEEN` | `[identity]`                          | `[0]`, `[2]` or `[1][recorded_at u64]`                          |
//! | `NEAREST`    | `[k u32][identity]`                   | `[0]`, `[2]` or `[1][total u64][count u32]` + neighbor entries  |
//! | `COUNT`      | empty                                 | `[2]` or `[1][total u64]`                                       |
//!
//! Read replies lead with a status byte: `0` not registered, `1` found,
//! `2` the request failed (bad body or storage error).
//! A neighbor entry is `[id_len u16][identity][distance_km f64][lat f64][lng f64]`.
//! All integers and floats are little-endian.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::model::Nearest;
use crate::NearbyDb;

// --- OpCodes ---
pub const OP_RECORD: u8     = 0x01;
pub const OP_FIRST_SEEN: u8 = 0x02;
pub const OP_NEAREST: u8    = 0x03;
pub const OP_COUNT: u8      = 0x04;

// --- Read status ---
pub const STATUS_ABSENT: u8 = 0x00;
pub const STATUS_FOUND: u8  = 0x01;
pub const STATUS_FAILED: u8 = 0x02;

/// Largest accepted request body.
pub const MAX_BODY: usize = 64 * 1024;

pub struct NearbyServer {
    db: Arc<NearbyDb>,
    cooldown: Option<Duration>,
}

impl NearbyServer {
    pub fn new(db: Arc<NearbyDb>, cooldown: Option<Duration>) -> Self {
        Self { db, cooldown }
    }

    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Nearby protocol listening on {}", addr);

        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    let db = self.db.clone();
                    let cooldown = self.cooldown;
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(socket, db, cooldown).await {
                            // Ignore expected disconnections to keep logs clean
                            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                                warn!(%peer, "client error: {}", e);
                            }
                        }
                    });
                }
                Err(e) => error!("connection failed: {}", e),
            }
        }
    }
}

async fn handle_client(mut stream: TcpStream, db: Arc<NearbyDb>, cooldown: Option<Duration>) -> std::io::Result<()> {
    let mut buffer = vec![0u8; MAX_BODY];

    loop {
        // 1. Read OpCode
        let mut op_buf = [0u8; 1];
        if stream.read_exact(&mut op_buf).await.is_err() {
            return Ok(());
        }
        let op_code = op_buf[0];

        // 2. Read Length
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(());
        }
        let length = u32::from_le_bytes(len_buf) as usize;

        // 3. Read Body
        if length > buffer.len() {
            warn!("payload too large: {} bytes (max {})", length, MAX_BODY);
            return Ok(());
        }
        stream.read_exact(&mut buffer[..length]).await?;
        let payload = buffer[..length].to_vec();

        let mut writer = BufWriter::new(&mut stream);

        // 4. Process Command
        match op_code {
            OP_RECORD     => handle_record(&mut writer, payload, &db, cooldown).await?,
            OP_FIRST_SEEN => handle_first_seen(&mut writer, payload, &db).await?,
            OP_NEAREST    => handle_nearest(&mut writer, payload, &db).await?,
            OP_COUNT      => handle_count(&mut writer, &db).await?,
            _ => {
                warn!("unknown opcode: 0x{:02X}", op_code);
                return Ok(());
            }
        }
        writer.flush().await?;
    }
}

/// Run a blocking store call off the async workers.
async fn blocking<T, F>(db: &Arc<NearbyDb>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&NearbyDb) -> Result<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(db.as_ref()))
    .await
    .map_err(|e| Error::Protocol(format!("store task failed: {}", e)))?
}

// --- BODY DECODING ---

#[derive(Debug, PartialEq)]
pub struct RecordRequest {
    pub identity: String,
    pub latitude: f64,
    pub longitude: f64,
}

pub fn decode_record(data: &[u8]) -> Result<RecordRequest> {
    if data.len() <= 16 {
        return Err(Error::Protocol("record body too short".into()));
    }
    let latitude = f64::from_le_bytes(read_array(&data[0..8])?);
    let longitude = f64::from_le_bytes(read_array(&data[8..16])?);
    let identity = decode_identity(&data[16..])?;
    Ok(RecordRequest { identity, latitude, longitude })
}

pub fn decode_nearest(data: &[u8]) -> Result<(usize, String)> {
    if data.len() <= 4 {
        return Err(Error::Protocol("nearest body too short".into()));
    }
    let k = u32::from_le_bytes(read_array(&data[0..4])?) as usize;
    Ok((k, decode_identity(&data[4..])?))
}

pub fn decode_identity(data: &[u8]) -> Result<String> {
    String::from_utf8(data.to_vec()).map_err(|_| Error::Protocol("identity is not UTF-8".into()))
}

fn read_array<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    data.try_into().map_err(|_| Error::Protocol(format!("expected {} bytes", N)))
}

/// Serialize a ranking the way `OP_NEAREST` answers it (after the status byte).
pub fn encode_nearest(result: &Nearest) -> Result<Vec<u8>> {
    let total = u64::try_from(result.total).map_err(|_| Error::Protocol("total out of range".into()))?;
    let count = u32::try_from(result.ranked.len()).map_err(|_| Error::Protocol("too many neighbors".into()))?;

    let mut out = Vec::with_capacity(12 + result.ranked.len() * 40);
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    for n in &result.ranked {
        let id = n.identity.as_bytes();
        let id_len = u16::try_from(id.len())
        .map_err(|_| Error::Protocol(format!("identity of {} bytes does not fit a frame", id.len())))?;
        out.extend_from_slice(&id_len.to_le_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(&n.distance_km.to_le_bytes());
        out.extend_from_slice(&n.latitude.to_le_bytes());
        out.extend_from_slice(&n.longitude.to_le_bytes());
    }
    Ok(out)
}

// --- HANDLERS ---

async fn handle_record<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    data: Vec<u8>,
    db: &Arc<NearbyDb>,
    cooldown: Option<Duration>,
) -> std::io::Result<()> {
    let req = match decode_record(&data) {
        Ok(req) => req,
        Err(e) => {
            warn!("rejecting record: {}", e);
            writer.write_all(b"ER").await?;
            return Ok(());
        }
    };

    let res = blocking(db, move |db| {
        if let Some(cooldown) = cooldown {
            if let Some(allowed_at) = db.change_allowed_at(&req.identity, cooldown)? {
                return Ok(Some(allowed_at));
            }
        }
        db.record(&req.identity, req.latitude, req.longitude)?;
        Ok(None)
    })
    .await;

    match res {
        Ok(None) => writer.write_all(b"OK").await?,
        Ok(Some(allowed_at)) => {
            writer.write_all(b"CD").await?;
            writer.write_all(&allowed_at.to_le_bytes()).await?;
        }
        Err(e) => {
            error!("record failed: {}", e);
            writer.write_all(b"ER").await?;
        }
    }
    Ok(())
}

async fn handle_first_seen<W: AsyncWriteExt + Unpin>(writer: &mut W, data: Vec<u8>, db: &Arc<NearbyDb>) -> std::io::Result<()> {
    let found = match decode_identity(&data) {
        Ok(identity) => blocking(db, move |db| db.first_seen(&identity)).await,
        Err(e) => Err(e),
    };

    match found {
        Ok(Some(ts)) => {
            writer.write_all(&[STATUS_FOUND]).await?;
            writer.write_all(&ts.to_le_bytes()).await?;
        }
        Ok(None) => writer.write_all(&[STATUS_ABSENT]).await?,
        Err(e) => {
            error!("first-seen lookup failed: {}", e);
            writer.write_all(&[STATUS_FAILED]).await?;
        }
    }
    Ok(())
}

async fn handle_nearest<W: AsyncWriteExt + Unpin>(writer: &mut W, data: Vec<u8>, db: &Arc<NearbyDb>) -> std::io::Result<()> {
    let result = match decode_nearest(&data) {
        Ok((k, identity)) => blocking(db, move |db| db.nearest(&identity, k)).await,
        Err(e) => Err(e),
    };

    match result.and_then(|found| found.as_ref().map(encode_nearest).transpose()) {
        Ok(Some(encoded)) => {
            writer.write_all(&[STATUS_FOUND]).await?;
            writer.write_all(&encoded).await?;
        }
        Ok(None) => writer.write_all(&[STATUS_ABSENT]).await?,
        Err(e) => {
            error!("nearest query failed: {}", e);
            writer.write_all(&[STATUS_FAILED]).await?;
        }
    }
    Ok(())
}

async fn handle_count<W: AsyncWriteExt + Unpin>(writer: &mut W, db: &Arc<NearbyDb>) -> std::io::Result<()> {
    match blocking(db, |db| db.count()).await {
        Ok(total) => {
            writer.write_all(&[STATUS_FOUND]).await?;
            writer.write_all(&(total as u64).to_le_bytes()).await?;
        }
        Err(e) => {
            error!("count failed: {}", e);
            writer.write_all(&[STATUS_FAILED]).await?;
        }
    }
    Ok(())
}
