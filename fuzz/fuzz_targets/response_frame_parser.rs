#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use modbus_master::{frame::parse_frame, guess_response_frame_len, ModbusProto, Operation};

#[derive(Debug, Arbitrary)]
enum FuzzProto {
    Rtu,
    Tcp,
}

impl From<FuzzProto> for ModbusProto {
    fn from(p: FuzzProto) -> Self {
        match p {
            FuzzProto::Rtu => ModbusProto::Rtu,
            FuzzProto::Tcp => ModbusProto::Tcp,
        }
    }
}

#[derive(Debug, Arbitrary)]
struct FuzzInput<'a> {
    tr_id: u16,
    unit_id: u8,
    address: u16,
    quantity: u16,
    proto: FuzzProto,
    response_buf: &'a [u8],
}

fuzz_target!(|input: FuzzInput| {
    // only panics matter, results are ignored
    let proto = input.proto.into();
    let _ = guess_response_frame_len(input.response_buf, proto);
    if let Ok(pdu) = parse_frame(proto, input.tr_id, input.unit_id, input.response_buf) {
        let ops = [
            Operation::ReadCoils {
                address: input.address,
                quantity: input.quantity,
            },
            Operation::ReadHolding {
                address: input.address,
                quantity: input.quantity,
            },
            Operation::WriteRegister {
                address: input.address,
                value: input.quantity,
            },
        ];
        for op in ops {
            let _ = op.decode(pdu.data);
        }
    }
});
