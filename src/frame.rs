//! Frame codec: wraps PDUs into TCP (MBAP) or RTU (CRC) frames and unwraps responses
use crate::consts::{
    MAX_PDU_LEN, MBAP_HEADER_LEN, MBAP_MAX_LENGTH, MODBUS_EXCEPTION_FLAG, RTU_MIN_FRAME_LEN,
};
use crate::{crc16, Error, ExceptionCode, FrameError, ModbusProto};

/// Function code and payload of a successful response
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Pdu<'a> {
    pub func: u8,
    pub data: &'a [u8],
}

/// Builds a request frame
///
/// `tr_id` is ignored for RTU.
///
/// TCP: `[tr_id:2][0x0000][length:2][unit_id][func][data]`, length = data + 2
///
/// RTU: `[unit_id][func][data][crc lo][crc hi]`
pub fn build_frame(
    proto: ModbusProto,
    tr_id: u16,
    unit_id: u8,
    func: u8,
    data: &[u8],
) -> Result<Vec<u8>, FrameError> {
    if data.len() + 1 > MAX_PDU_LEN {
        return Err(FrameError::Oversize(data.len() + 1));
    }
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 1 + data.len());
    match proto {
        ModbusProto::Tcp => {
            #[allow(clippy::cast_possible_truncation)]
            let len = (data.len() + 2) as u16;
            frame.extend_from_slice(&tr_id.to_be_bytes());
            frame.extend_from_slice(&[0, 0]);
            frame.extend_from_slice(&len.to_be_bytes());
            frame.push(unit_id);
            frame.push(func);
            frame.extend_from_slice(data);
        }
        ModbusProto::Rtu => {
            frame.push(unit_id);
            frame.push(func);
            frame.extend_from_slice(data);
            let crc = crc16(&frame);
            frame.extend_from_slice(&crc.to_le_bytes());
        }
    }
    Ok(frame)
}

/// Validates the 7-byte MBAP header of a response
///
/// Returns how many bytes (function code + data) follow the header.
pub fn parse_mbap_header(header: &[u8], tr_id: u16) -> Result<usize, FrameError> {
    if header.len() < MBAP_HEADER_LEN {
        return Err(FrameError::TooShort { len: header.len() });
    }
    let received = u16::from_be_bytes([header[0], header[1]]);
    if received != tr_id {
        return Err(FrameError::TransactionMismatch {
            sent: tr_id,
            received,
        });
    }
    let proto_id = u16::from_be_bytes([header[2], header[3]]);
    if proto_id != 0 {
        return Err(FrameError::ProtocolId(proto_id));
    }
    let len = u16::from_be_bytes([header[4], header[5]]);
    if len < 2 || len > MBAP_MAX_LENGTH {
        return Err(FrameError::InvalidLength(len));
    }
    Ok(usize::from(len) - 1)
}

/// Parses a complete response frame
///
/// Exception responses (function code with the high bit set) are returned as
/// [`Error::Exception`], framing problems as [`Error::Frame`].
///
/// For RTU the checksum is verified before anything else is looked at, so a corrupted exception
/// frame is reported as a CRC mismatch rather than as an exception.
pub fn parse_frame(
    proto: ModbusProto,
    tr_id: u16,
    unit_id: u8,
    buf: &[u8],
) -> Result<Pdu<'_>, Error> {
    let pdu = match proto {
        ModbusProto::Tcp => {
            let len = parse_mbap_header(buf, tr_id)?;
            let end = MBAP_HEADER_LEN + len;
            if buf.len() < end {
                return Err(FrameError::TooShort { len: buf.len() }.into());
            }
            check_unit(unit_id, buf[6])?;
            &buf[MBAP_HEADER_LEN..end]
        }
        ModbusProto::Rtu => {
            let l = buf.len();
            if l < RTU_MIN_FRAME_LEN {
                return Err(FrameError::TooShort { len: l }.into());
            }
            let calculated = crc16(&buf[..l - 2]);
            let received = u16::from_le_bytes([buf[l - 2], buf[l - 1]]);
            if calculated != received {
                return Err(FrameError::CrcMismatch {
                    calculated,
                    received,
                }
                .into());
            }
            check_unit(unit_id, buf[0])?;
            &buf[1..l - 2]
        }
    };
    let (&func, data) = pdu
        .split_first()
        .ok_or(FrameError::TooShort { len: buf.len() })?;
    if func & MODBUS_EXCEPTION_FLAG != 0 {
        let code = data
            .first()
            .ok_or(FrameError::TooShort { len: buf.len() })?;
        return Err(Error::Exception {
            function: func & !MODBUS_EXCEPTION_FLAG,
            code: ExceptionCode::from_modbus_error(*code),
        });
    }
    Ok(Pdu { func, data })
}

fn check_unit(expected: u8, received: u8) -> Result<(), FrameError> {
    if expected == received {
        Ok(())
    } else {
        Err(FrameError::UnitMismatch { expected, received })
    }
}
