//! Frame codec vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;

use bytes::BytesMut;

use kairos_proto::wire::try_decode;

use vector_loader::TestVector;

fn load(name: &str) -> TestVector {
    let s = fs::read_to_string(format!("tests/vectors/{name}")).unwrap();
    serde_json::from_str(&s).unwrap()
}

#[test]
fn frame_vectors() {
    let files = [
        "frame_draw_point_ok.json",
        "frame_bad_magic.json",
        "frame_bad_version.json",
        "frame_unknown_tag.json",
        "frame_oversize.json",
        "frame_partial_payload.json",
    ];

    for f in files {
        let v = load(f);
        let mut buf = BytesMut::from(&v.frame.decode()[..]);
        let res = try_decode(&mut buf);

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.kind(), err.kind, "vector={}", v.description);
            continue;
        }

        let ex = v.expect.expect("missing expect block");
        if ex.get("partial").and_then(|p| p.as_bool()).unwrap_or(false) {
            assert!(
                res.expect("partial input must not error").is_none(),
                "vector={}",
                v.description
            );
            continue;
        }

        let frame = res.expect("decode failed").expect("expected a whole frame");
        assert_eq!(
            frame.header.msg_type as u64,
            ex["type"].as_u64().unwrap(),
            "vector={}",
            v.description
        );
        assert_eq!(frame.header.layer_id as u64, ex["layer_id"].as_u64().unwrap());
        assert_eq!(frame.header.client_id as u64, ex["client_id"].as_u64().unwrap());
        assert_eq!(frame.header.sequence as u64, ex["sequence"].as_u64().unwrap());
        assert_eq!(frame.payload.len() as u64, ex["payload_len"].as_u64().unwrap());
    }
}

#[test]
fn random_buffers_never_yield_spurious_frames() {
    // Deterministic xorshift; any byte soup must either fail validation or
    // report "need more bytes", never hand back a frame that did not pass
    // the header checks.
    let mut state = 0x2545_F491_4F6C_DD1Du64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state as u8
    };

    for _ in 0..256 {
        let len = 1 + (next() as usize % 96);
        let mut buf = BytesMut::with_capacity(len);
        for _ in 0..len {
            buf.extend_from_slice(&[next()]);
        }
        match try_decode(&mut buf) {
            Ok(Some(frame)) => {
                // A frame only comes back if the magic happened to match.
                assert_eq!(frame.header.data_size as usize, frame.payload.len());
            }
            Ok(None) | Err(_) => {}
        }
    }
}
