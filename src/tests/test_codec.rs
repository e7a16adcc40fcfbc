use crate::consts::*;
use crate::frame::*;
use crate::function::{pack_bits, unpack_bits};
use crate::*;
use ::crc16::{State, MODBUS};
use rand::Rng;
use std::io::Cursor;
use std::time::Duration;

use crate::transport::{read_rtu_available, read_rtu_frame, read_tcp_frame};

#[test]
fn test_crc16_reference_vectors() {
    // bytes are appended low first: 01 03 00 00 00 0A C5 CD
    assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
    // 11 03 00 6B 00 03 76 87
    assert_eq!(crc16(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]), 0x8776);
    assert_eq!(crc16(&[]), 0xFFFF);
}

#[test]
fn test_crc16_matches_reference_implementation() {
    let mut rng = rand::thread_rng();
    for len in 0..300 {
        let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        assert_eq!(crc16(&data), State::<MODBUS>::calculate(&data));
        assert_eq!(crc16(&data), crc16(&data));
    }
}

#[test]
fn test_tcp_build_frame() {
    let frame = build_frame(ModbusProto::Tcp, 0x1234, 7, 3, &[0, 100, 0, 10]).unwrap();
    assert_eq!(
        frame,
        [0x12, 0x34, 0, 0, 0, 6, 7, 3, 0, 100, 0, 10]
    );
}

#[test]
fn test_rtu_build_frame_write_coil() {
    let op = Operation::WriteCoil {
        address: 5,
        value: true,
    };
    let data = op.encode().unwrap();
    let frame = build_frame(ModbusProto::Rtu, 0, 1, op.function().code(), &data).unwrap();
    assert_eq!(frame[..6], [0x01, 0x05, 0x00, 0x05, 0xFF, 0x00]);
    let crc = State::<MODBUS>::calculate(&frame[..6]).to_le_bytes();
    assert_eq!(frame[6..], crc);
    assert_eq!(frame[6..], [0x9C, 0x3B]);
}

#[test]
fn test_build_parse_roundtrip() {
    let mut rng = rand::thread_rng();
    for func in [1u8, 2, 3, 4, 5, 6, 15, 16] {
        for len in [0usize, 1, 4, 5, 100, 252] {
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            for proto in [ModbusProto::Tcp, ModbusProto::Rtu] {
                let tr_id: u16 = rng.gen();
                let frame = build_frame(proto, tr_id, 17, func, &data).unwrap();
                let pdu = parse_frame(proto, tr_id, 17, &frame).unwrap();
                assert_eq!(pdu.func, func);
                assert_eq!(pdu.data, data.as_slice());
            }
        }
    }
}

#[test]
fn test_build_frame_oversize() {
    let data = [0u8; MAX_PDU_LEN];
    for proto in [ModbusProto::Tcp, ModbusProto::Rtu] {
        assert_eq!(
            build_frame(proto, 1, 1, 16, &data).unwrap_err(),
            FrameError::Oversize(MAX_PDU_LEN + 1)
        );
    }
}

#[test]
fn test_tcp_transaction_id_mismatch() {
    let frame = build_frame(ModbusProto::Tcp, 41, 1, 3, &[2, 0, 1]).unwrap();
    match parse_frame(ModbusProto::Tcp, 42, 1, &frame) {
        Err(Error::Frame(FrameError::TransactionMismatch { sent, received })) => {
            assert_eq!(sent, 42);
            assert_eq!(received, 41);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_tcp_header_checks() {
    assert_eq!(
        parse_mbap_header(&[0, 1, 0, 0, 0, 5, 1], 1).unwrap(),
        4
    );
    assert_eq!(
        parse_mbap_header(&[0, 1, 0, 1, 0, 5, 1], 1).unwrap_err(),
        FrameError::ProtocolId(1)
    );
    assert_eq!(
        parse_mbap_header(&[0, 1, 0, 0, 0, 1, 1], 1).unwrap_err(),
        FrameError::InvalidLength(1)
    );
    assert_eq!(
        parse_mbap_header(&[0, 1, 0, 0, 1, 0, 1], 1).unwrap_err(),
        FrameError::InvalidLength(256)
    );
    assert_eq!(
        parse_mbap_header(&[0, 1, 0, 0], 1).unwrap_err(),
        FrameError::TooShort { len: 4 }
    );
    // header declares more than was received
    let frame = [0, 1, 0, 0, 0, 6, 1, 3, 2, 0];
    assert!(matches!(
        parse_frame(ModbusProto::Tcp, 1, 1, &frame),
        Err(Error::Frame(FrameError::TooShort { .. }))
    ));
    let frame = build_frame(ModbusProto::Tcp, 1, 2, 3, &[2, 0, 1]).unwrap();
    assert!(matches!(
        parse_frame(ModbusProto::Tcp, 1, 1, &frame),
        Err(Error::Frame(FrameError::UnitMismatch {
            expected: 1,
            received: 2
        }))
    ));
}

#[test]
fn test_rtu_single_bit_corruption_detected() {
    let mut rng = rand::thread_rng();
    for _ in 0..20 {
        let len = rng.gen_range(0, 40);
        let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        let frame = build_frame(ModbusProto::Rtu, 0, 1, 3, &data).unwrap();
        for bit in 0..frame.len() * 8 {
            let mut broken = frame.clone();
            broken[bit / 8] ^= 1 << (bit % 8);
            match parse_frame(ModbusProto::Rtu, 0, 1, &broken) {
                Err(Error::Frame(FrameError::CrcMismatch { .. })) => {}
                other => panic!("bit {} flip accepted: {:?}", bit, other),
            }
        }
    }
}

#[test]
fn test_rtu_too_short() {
    for len in 0..RTU_MIN_FRAME_LEN {
        let frame = vec![1u8; len];
        assert!(matches!(
            parse_frame(ModbusProto::Rtu, 0, 1, &frame),
            Err(Error::Frame(FrameError::TooShort { .. }))
        ));
    }
    // minimal frame with a valid checksum but an exception flag and no code
    let frame = build_frame(ModbusProto::Rtu, 0, 1, 0x83, &[]).unwrap();
    assert!(matches!(
        parse_frame(ModbusProto::Rtu, 0, 1, &frame),
        Err(Error::Frame(FrameError::TooShort { .. }))
    ));
}

#[test]
fn test_rtu_unit_mismatch() {
    let frame = build_frame(ModbusProto::Rtu, 0, 9, 3, &[2, 0, 1]).unwrap();
    assert!(matches!(
        parse_frame(ModbusProto::Rtu, 0, 1, &frame),
        Err(Error::Frame(FrameError::UnitMismatch {
            expected: 1,
            received: 9
        }))
    ));
}

#[test]
fn test_exception_decoding() {
    for proto in [ModbusProto::Tcp, ModbusProto::Rtu] {
        for code in [1u8, 2, 3, 4, 6, 0x0b, 0x42] {
            let frame = build_frame(proto, 5, 1, 0x83, &[code]).unwrap();
            match parse_frame(proto, 5, 1, &frame) {
                Err(Error::Exception { function, code: exc }) => {
                    assert_eq!(function, 3);
                    assert_eq!(exc.code(), code);
                }
                other => panic!("exception not decoded: {:?}", other),
            }
        }
    }
    let frame = [0x00, 0x07, 0, 0, 0, 3, 1, 0x85, 2];
    let err = parse_frame(ModbusProto::Tcp, 7, 1, &frame).unwrap_err();
    assert_eq!(err.exception(), Some(ExceptionCode::IllegalDataAddress));
    assert_eq!(ExceptionCode::from_modbus_error(0x42), ExceptionCode::Unknown(0x42));
}

#[test]
fn test_guess_response_frame_len() {
    assert_eq!(
        guess_response_frame_len(&[0, 1, 0, 0, 0, 7], ModbusProto::Tcp).unwrap(),
        13
    );
    assert_eq!(
        guess_response_frame_len(&[1, 3, 4], ModbusProto::Rtu).unwrap(),
        9
    );
    assert_eq!(
        guess_response_frame_len(&[1, 1, 2], ModbusProto::Rtu).unwrap(),
        7
    );
    assert_eq!(
        guess_response_frame_len(&[1, 16, 0], ModbusProto::Rtu).unwrap(),
        8
    );
    assert_eq!(
        guess_response_frame_len(&[1, 0x83, 2], ModbusProto::Rtu).unwrap(),
        5
    );
    assert_eq!(
        guess_response_frame_len(&[1, 0x2b, 2], ModbusProto::Rtu).unwrap_err(),
        FrameError::UnknownFunction(0x2b)
    );
    assert_eq!(
        guess_response_frame_len(&[1, 3, 255], ModbusProto::Rtu).unwrap_err(),
        FrameError::InvalidLength(260)
    );
    assert_eq!(
        guess_response_frame_len(&[1, 3], ModbusProto::Rtu).unwrap_err(),
        FrameError::TooShort { len: 2 }
    );
}

#[test]
fn test_encode_read_requests() {
    let ops = [
        (Operation::ReadCoils { address: 0x13, quantity: 0x25 }, 1u8),
        (Operation::ReadDiscrete { address: 0xc4, quantity: 0x16 }, 2),
        (Operation::ReadHolding { address: 0x6b, quantity: 3 }, 3),
        (Operation::ReadInput { address: 8, quantity: 1 }, 4),
    ];
    for (op, code) in ops {
        assert_eq!(op.function().code(), code);
        let address = op.address().to_be_bytes();
        let quantity = op.quantity().to_be_bytes();
        assert_eq!(
            op.encode().unwrap(),
            [address[0], address[1], quantity[0], quantity[1]]
        );
    }
}

#[test]
fn test_encode_write_requests() {
    let op = Operation::WriteCoil {
        address: 0xac,
        value: false,
    };
    assert_eq!(op.encode().unwrap(), [0, 0xac, 0, 0]);
    let op = Operation::WriteRegister {
        address: 1,
        value: 0x0003,
    };
    assert_eq!(op.encode().unwrap(), [0, 1, 0, 3]);
    let op = Operation::WriteCoils {
        address: 0x13,
        values: vec![true, false, true, true, false, false, true, true, true, false],
    };
    assert_eq!(op.quantity(), 10);
    assert_eq!(op.encode().unwrap(), [0, 0x13, 0, 0x0a, 2, 0xcd, 0x01]);
    let op = Operation::WriteRegisters {
        address: 1,
        values: vec![0x000a, 0x0102],
    };
    assert_eq!(op.encode().unwrap(), [0, 1, 0, 2, 4, 0, 0x0a, 1, 2]);
    let op = Operation::WriteRegisters {
        address: 1,
        values: vec![0; 128],
    };
    assert_eq!(op.encode().unwrap_err(), FrameError::Oversize(262));
}

#[test]
fn test_decode_holding_registers() {
    let op = Operation::ReadHolding {
        address: 0,
        quantity: 2,
    };
    let frame = [0x00, 0x01, 0, 0, 0, 7, 1, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x14];
    let pdu = parse_frame(ModbusProto::Tcp, 1, 1, &frame).unwrap();
    assert_eq!(pdu.func, 3);
    assert_eq!(op.decode(pdu.data).unwrap(), Value::Registers(vec![10, 20]));
}

#[test]
fn test_decode_coils() {
    let op = Operation::ReadCoils {
        address: 0x13,
        quantity: 10,
    };
    let value = op.decode(&[2, 0xcd, 0x01]).unwrap();
    assert_eq!(
        value,
        Value::Bits(vec![
            true, false, true, true, false, false, true, true, true, false
        ])
    );
    // byte count not matching the quantity
    assert_eq!(
        op.decode(&[1, 0xcd]).unwrap_err(),
        FrameError::ByteCount {
            byte_count: 1,
            quantity: 10
        }
    );
    // byte count promises more than was received
    assert_eq!(
        op.decode(&[2, 0xcd]).unwrap_err(),
        FrameError::ByteCount {
            byte_count: 2,
            quantity: 10
        }
    );
    assert_eq!(op.decode(&[]).unwrap_err(), FrameError::TooShort { len: 1 });
}

#[test]
fn test_decode_write_echo() {
    let op = Operation::WriteRegister {
        address: 1,
        value: 3,
    };
    assert_eq!(op.decode(&[0, 1, 0, 3]).unwrap(), Value::Echo(3));
    let op = Operation::WriteCoil {
        address: 5,
        value: true,
    };
    assert_eq!(op.decode(&[0, 5, 0xff, 0]).unwrap(), Value::Echo(1));
    assert_eq!(op.decode(&[0, 5, 0, 0]).unwrap(), Value::Echo(0));
    let op = Operation::WriteCoils {
        address: 0x13,
        values: vec![true; 10],
    };
    assert_eq!(op.decode(&[0, 0x13, 0, 0x0a]).unwrap(), Value::Echo(10));
    assert_eq!(op.decode(&[0, 0x13]).unwrap_err(), FrameError::TooShort { len: 3 });
}

#[test]
fn test_pack_unpack_bits() {
    assert_eq!(unpack_bits(&[0xcd, 0x01], 10), [
        true, false, true, true, false, false, true, true, true, false
    ]);
    assert_eq!(pack_bits(&[true; 9]), [0xff, 0x01]);
    assert_eq!(pack_bits(&[]), Vec::<u8>::new());
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let len: u16 = rng.gen_range(1, 2009);
        let values: Vec<bool> = (0..len).map(|_| rng.gen()).collect();
        let packed = pack_bits(&values);
        assert_eq!(packed.len(), (usize::from(len) + 7) / 8);
        assert_eq!(unpack_bits(&packed, len), values);
    }
}

#[test]
fn test_function_names() {
    for f in Function::ALL {
        assert_eq!(f.name().parse::<Function>().unwrap(), f);
        assert_eq!(Function::from_code(f.code()), Some(f));
    }
    assert!(matches!(
        "read_everything".parse::<Function>(),
        Err(Error::Config(_))
    ));
    assert_eq!(Function::from_code(0x2b), None);
    assert!(Function::ReadInput.is_read());
    assert!(!Function::WriteCoils.is_read());
}

#[test]
fn test_read_tcp_frame() {
    let timeout = Duration::from_millis(100);
    let first = build_frame(ModbusProto::Tcp, 1, 1, 3, &[2, 0, 5]).unwrap();
    let second = build_frame(ModbusProto::Tcp, 2, 1, 6, &[0, 1, 0, 3]).unwrap();
    let mut stream = Cursor::new([first.clone(), second.clone()].concat());
    assert_eq!(read_tcp_frame(&mut stream, timeout).unwrap(), first);
    assert_eq!(read_tcp_frame(&mut stream, timeout).unwrap(), second);
    assert!(matches!(
        read_tcp_frame(&mut stream, timeout),
        Err(Error::Io(_))
    ));
    let mut stream = Cursor::new(vec![0, 1, 0, 0, 0, 0, 1]);
    assert!(matches!(
        read_tcp_frame(&mut stream, timeout),
        Err(Error::Frame(FrameError::InvalidLength(0)))
    ));
}

#[test]
fn test_read_rtu_frame() {
    let timeout = Duration::from_millis(100);
    let first = build_frame(ModbusProto::Rtu, 0, 1, 1, &[2, 0xcd, 0x01]).unwrap();
    let second = build_frame(ModbusProto::Rtu, 0, 1, 0x81, &[2]).unwrap();
    let third = build_frame(ModbusProto::Rtu, 0, 1, 15, &[0, 0x13, 0, 0x0a]).unwrap();
    let mut stream = Cursor::new([first.clone(), second.clone(), third.clone()].concat());
    assert_eq!(read_rtu_frame(&mut stream, timeout).unwrap(), first);
    assert_eq!(read_rtu_frame(&mut stream, timeout).unwrap(), second);
    assert_eq!(read_rtu_frame(&mut stream, timeout).unwrap(), third);
}

#[test]
fn test_read_rtu_available() {
    let timeout = Duration::from_millis(100);
    let frame = build_frame(ModbusProto::Rtu, 0, 1, 3, &[4, 0, 10, 0, 20]).unwrap();
    let mut stream = Cursor::new(frame.clone());
    let received = read_rtu_available(&mut stream, timeout).unwrap();
    assert_eq!(received, frame);
    assert!(parse_frame(ModbusProto::Rtu, 0, 1, &received).is_ok());
    assert!(matches!(
        read_rtu_available(&mut stream, timeout),
        Err(Error::Timeout(_))
    ));
    // two frames delivered in one read are taken as one and fail the checksum
    let mut stream = Cursor::new([frame.clone(), frame].concat());
    let received = read_rtu_available(&mut stream, timeout).unwrap();
    assert!(matches!(
        parse_frame(ModbusProto::Rtu, 0, 1, &received),
        Err(Error::Frame(FrameError::CrcMismatch { .. }))
    ));
}
