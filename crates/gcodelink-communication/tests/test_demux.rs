use gcodelink_communication::{Frame, FrameDemux};
use proptest::prelude::*;
use proptest::sample::Index;

#[derive(Debug, Clone)]
enum Item {
    Status(String),
    Line(String),
}

fn item() -> impl Strategy<Value = Item> {
    prop_oneof![
        "[A-Za-z0-9|:,.-]{1,40}".prop_map(Item::Status),
        "[A-Za-z0-9:.$\\[\\]]{1,40}".prop_map(Item::Line),
    ]
}

fn encode(items: &[Item]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for item in items {
        match item {
            Item::Status(payload) => {
                bytes.push(b'<');
                bytes.extend_from_slice(payload.as_bytes());
                bytes.push(b'>');
            }
            Item::Line(text) => {
                bytes.extend_from_slice(text.as_bytes());
                bytes.extend_from_slice(b"\r\n");
            }
        }
    }
    bytes
}

fn feed(bytes: &[u8], cuts: &[Index]) -> Vec<Frame> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c.index(bytes.len() + 1)).collect();
    points.push(bytes.len());
    points.sort_unstable();

    let mut demux = FrameDemux::new();
    let mut frames = Vec::new();
    let mut start = 0;
    for point in points {
        frames.extend(demux.push(&bytes[start..point]));
        start = point;
    }
    frames
}

proptest! {
    #[test]
    fn prop_split_invariance(
        items in prop::collection::vec(item(), 0..40),
        cuts in prop::collection::vec(any::<Index>(), 0..24),
    ) {
        let bytes = encode(&items);
        let frames = feed(&bytes, &cuts);

        let expected_statuses: Vec<&str> = items
            .iter()
            .filter_map(|i| match i { Item::Status(s) => Some(s.as_str()), _ => None })
            .collect();
        let expected_lines: Vec<&str> = items
            .iter()
            .filter_map(|i| match i { Item::Line(l) => Some(l.as_str()), _ => None })
            .collect();

        let statuses: Vec<&str> = frames
            .iter()
            .filter_map(|f| match f { Frame::Status(s) => Some(s.as_str()), _ => None })
            .collect();
        let lines: Vec<&str> = frames
            .iter()
            .filter_map(|f| match f { Frame::Line(l) => Some(l.as_str()), _ => None })
            .collect();

        prop_assert_eq!(statuses, expected_statuses);
        prop_assert_eq!(lines, expected_lines);
    }

    #[test]
    fn prop_byte_at_a_time_matches_whole(items in prop::collection::vec(item(), 0..20)) {
        let bytes = encode(&items);

        let mut whole = FrameDemux::new();
        let mut all = whole.push(&bytes);

        let mut single = FrameDemux::new();
        let mut one_by_one: Vec<Frame> = bytes.iter().flat_map(|b| single.push(&[*b])).collect();

        // Per-chunk ordering puts statuses first; compare each sub-stream.
        all.sort_by_key(|f| matches!(f, Frame::Line(_)));
        one_by_one.sort_by_key(|f| matches!(f, Frame::Line(_)));
        prop_assert_eq!(all, one_by_one);
    }
}

#[test]
fn test_interleaved_controller_traffic() {
    let mut demux = FrameDemux::new();
    let chunks: [&[u8]; 5] = [
        b"Grbl 1.1h ['$' for help]\r\n<Id",
        b"le|MPos:0.000,0.000,0.000|FS:0,0|WCO:0.000,0.000,0.000>",
        b"o",
        b"k\r\n[G54:0.000,0.000,0.000]\r\n[TLO:0.000]\r",
        b"\nok\r\n",
    ];

    let frames: Vec<Frame> = chunks.iter().flat_map(|c| demux.push(c)).collect();
    assert_eq!(
        frames,
        vec![
            Frame::Line("Grbl 1.1h ['$' for help]".to_string()),
            Frame::Status("Idle|MPos:0.000,0.000,0.000|FS:0,0|WCO:0.000,0.000,0.000".to_string()),
            Frame::Line("ok".to_string()),
            Frame::Line("[G54:0.000,0.000,0.000]".to_string()),
            Frame::Line("[TLO:0.000]".to_string()),
            Frame::Line("ok".to_string()),
        ]
    );
    assert!(!demux.has_partial());
}
