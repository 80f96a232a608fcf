#![no_main]

use arbitrary::Arbitrary;
use fli::utils::lines::split_lines;
use fli::utils::search::{ByteSource, SliceSource, binary_search};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    data: &'a [u8],
    target: &'a [u8],
}

fuzz_target!(|input: Input| {
    // Sorted, distinct lines from arbitrary bytes
    let mut lines: Vec<&[u8]> = split_lines(input.data).collect();
    lines.sort();
    lines.dedup();

    let mut buffer = Vec::new();
    for line in &lines {
        buffer.extend_from_slice(line);
        buffer.push(b'\n');
    }

    let expected = lines.binary_search(&input.target).is_ok();
    let by_index = binary_search(&mut SliceSource::new(&lines), input.target).unwrap();
    assert_eq!(by_index.is_found(), expected);

    // Targets with a delimiter can match a line prefix of the buffer; skip them
    if !input.target.contains(&b'\n') {
        let by_bytes = binary_search(&mut ByteSource::new(&buffer), input.target).unwrap();
        assert_eq!(by_bytes.is_found(), expected);
    }
});
