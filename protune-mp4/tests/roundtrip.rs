mod common;

use common::{DEFAULT_DURATION, Fragment, container, samples};
use protune_mp4::{
    Mp4Parser, ParseMode, Reassembler, children, decrypt::DecryptedTrack, extract_samples,
    scan_boxes,
};
use std::{cell::RefCell, rc::Rc};

#[derive(Default)]
struct Tables {
    movie_duration: u32,
    stts: Vec<(u32, u32)>,
    stsz: Vec<u32>,
    stco: Vec<u32>,
}

fn read_tables(data: &[u8]) -> Tables {
    let tables = Rc::new(RefCell::new(Tables::default()));

    Mp4Parser::new()
        .base_box("moov", children)
        .full_box("mvhd", {
            let tables = tables.clone();
            move |mut box_| {
                box_.reader.skip(12)?;
                tables.borrow_mut().movie_duration = box_.reader.read_u32()?;
                Ok(())
            }
        })
        .base_box("trak", children)
        .base_box("mdia", children)
        .base_box("minf", children)
        .base_box("stbl", children)
        .full_box("stts", {
            let tables = tables.clone();
            move |mut box_| {
                for _ in 0..box_.reader.read_u32()? {
                    let entry = (box_.reader.read_u32()?, box_.reader.read_u32()?);
                    tables.borrow_mut().stts.push(entry);
                }
                Ok(())
            }
        })
        .full_box("stsz", {
            let tables = tables.clone();
            move |mut box_| {
                box_.reader.skip(4)?;
                for _ in 0..box_.reader.read_u32()? {
                    let size = box_.reader.read_u32()?;
                    tables.borrow_mut().stsz.push(size);
                }
                Ok(())
            }
        })
        .full_box("stco", {
            let tables = tables.clone();
            move |mut box_| {
                for _ in 0..box_.reader.read_u32()? {
                    let offset = box_.reader.read_u32()?;
                    tables.borrow_mut().stco.push(offset);
                }
                Ok(())
            }
        })
        .parse(data, false, false)
        .unwrap();

    tables.take()
}

#[test]
fn clear_container_survives_extract_and_reassemble() {
    let first = samples(5, 33, 1);
    let second = samples(3, 17, 2);
    let data = container(
        None,
        &[
            Fragment::audio(first.clone()),
            Fragment {
                durations: vec![512, 512, 700],
                ..Fragment::audio(second.clone())
            },
        ],
    );

    let track = extract_samples(&data, ParseMode::Strict).unwrap();
    let total = track.total_duration();
    let skeleton = track.skeleton.clone();
    let clear = DecryptedTrack::from_clear(track.samples);
    let output = Reassembler::new(&skeleton).write(&clear).unwrap();

    let boxes = scan_boxes(&output).unwrap();
    let names = boxes.iter().map(|x| x.name()).collect::<Vec<_>>();
    assert_eq!(names, vec!["ftyp", "moov", "mdat"]);

    let mdat = &boxes[2];
    let payload = [first.clone(), second.clone()].concat().concat();
    assert_eq!(mdat.payload(&output), payload);

    let tables = read_tables(&output);
    assert_eq!(total, 5 * DEFAULT_DURATION as u64 + 512 + 512 + 700);
    assert_eq!(tables.movie_duration as u64, total);
    assert_eq!(
        tables.stts,
        vec![(5, DEFAULT_DURATION), (2, 512), (1, 700)]
    );
    assert_eq!(tables.stsz, [vec![33; 5], vec![17; 3]].concat());
    assert_eq!(tables.stco, vec![mdat.payload_offset() as u32]);
}
