//! 集成测试用的合成插件构造工具

#![allow(dead_code)]

use esp_engine::group::{GroupHeader, GroupType};
use esp_engine::header::{write_subrecord, RecordHeader};
use esp_engine::record::deflate_record_data;
use esp_engine::{FormId, RecordFlags, Signature};

pub fn subrecords(subs: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
    let mut data = Vec::new();
    for (sig, payload) in subs {
        write_subrecord(&mut data, Signature::new(sig), payload).unwrap();
    }
    data
}

pub fn record(sig: &[u8; 4], fid: u32, flags: RecordFlags, subs: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
    let mut data = subrecords(subs);
    if flags.contains(RecordFlags::COMPRESSED) {
        data = deflate_record_data(&data).unwrap();
    }
    let mut header = RecordHeader::new(Signature::new(sig), FormId(fid), flags);
    header.size = data.len() as u32;
    let mut out = header.pack().to_vec();
    out.extend(data);
    out
}

pub fn group(label: [u8; 4], group_type: GroupType, children: &[Vec<u8>]) -> Vec<u8> {
    let body = children.concat();
    let mut out = GroupHeader::new(label, group_type, 24 + body.len() as u32).pack().to_vec();
    out.extend(body);
    out
}

pub fn top(label: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    group(*label, GroupType::Top, children)
}

pub fn tes4(masters: &[&str]) -> Vec<u8> {
    tes4_with_flags(masters, RecordFlags::empty())
}

pub fn tes4_with_flags(masters: &[&str], flags: RecordFlags) -> Vec<u8> {
    let mut hedr = Vec::new();
    hedr.extend(1.7f32.to_le_bytes());
    hedr.extend(0u32.to_le_bytes());
    hedr.extend(0x800u32.to_le_bytes());
    let names: Vec<Vec<u8>> = masters.iter().map(|m| format!("{}\0", m).into_bytes()).collect();
    let mut subs: Vec<(&[u8; 4], &[u8])> = vec![(b"HEDR", &hedr), (b"CNAM", b"tester\0")];
    for name in &names {
        subs.push((b"MAST", name));
        subs.push((b"DATA", &[0u8; 8]));
    }
    record(b"TES4", 0, flags, &subs)
}

/// XCLL 光照数据的前36字节
pub fn lighting(near: f32, far: f32, clip: f32) -> Vec<u8> {
    let mut data = vec![0x20u8; 12];
    data.extend(near.to_le_bytes());
    data.extend(far.to_le_bytes());
    data.extend(0i32.to_le_bytes());
    data.extend(0i32.to_le_bytes());
    data.extend(1.0f32.to_le_bytes());
    data.extend(clip.to_le_bytes());
    data
}

pub fn f32_at(data: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}
