//! 删除候选扫描与雾距修复（经由文件系统）

mod common;

use common::*;
use esp_engine::catalog::common::sample_registry;
use esp_engine::cleaner::CellKind;
use esp_engine::group::GroupType;
use esp_engine::io::DefaultPluginSource;
use esp_engine::{CleanFlags, FogFixOptions, FogFixer, FormId, ModCleaner, NullProgress, RecordFlags};
use std::path::Path;

const CELL_FID: u32 = 0x0100_0C01;
const FOG_CELL_FID: u32 = 0x0100_0C02;

fn dirty_plugin() -> Vec<u8> {
    let cell = record(
        b"CELL",
        CELL_FID,
        RecordFlags::empty(),
        &[(b"EDID", b"DirtyCell\0"), (b"XCLL", &lighting(5.0, 3000.0, 0.0))],
    );
    let refr = record(b"REFR", 0x0000_ABCD, RecordFlags::DELETED, &[]);
    let temporary = group(CELL_FID.to_le_bytes(), GroupType::CellTemporaryChildren, &[refr]);
    let fog_cell = record(
        b"CELL",
        FOG_CELL_FID,
        RecordFlags::COMPRESSED,
        &[(b"EDID", b"FoggyCell\0"), (b"XCLL", &lighting(0.0, 0.0, 0.0))],
    );
    let plain_fog_cell = record(
        b"CELL",
        0x0100_0C03,
        RecordFlags::empty(),
        &[(b"EDID", b"Foggy2\0"), (b"XCLL", &lighting(0.0, 0.0, 0.0))],
    );
    let block = group(0u32.to_le_bytes(), GroupType::InteriorBlock, &[cell, temporary, fog_cell, plain_fog_cell]);

    let mut bytes = tes4(&["Skyrim.esm"]);
    bytes.extend(top(b"CELL", &[block]));
    bytes
}

fn write(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn test_detailed_scan_reports_parent_cell() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "Dirty.esp", &dirty_plugin());
    let registry = sample_registry().unwrap();

    let result = ModCleaner::new(&registry, &DefaultPluginSource)
        .with_flags(CleanFlags::ALL)
        .detailed(true)
        .scan(&path, &mut NullProgress)
        .unwrap();

    assert_eq!(result.udr.len(), 1);
    let udr = &result.udr[0];
    assert_eq!(udr.fid, FormId(0xABCD));
    assert_eq!(udr.parent_fid, Some(FormId(CELL_FID)));
    assert_eq!(udr.parent_eid, "DirtyCell");
    assert_eq!(udr.parent_kind, Some(CellKind::Interior));
    assert!(result.itm.is_empty());
    assert_eq!(
        result.fog.iter().copied().collect::<Vec<_>>(),
        vec![FormId(FOG_CELL_FID), FormId(0x0100_0C03)]
    );

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["udr"][0]["parent_eid"], "DirtyCell");
}

#[test]
fn test_fog_fix_rewrites_and_backs_up() {
    let dir = tempfile::tempdir().unwrap();
    let original = dirty_plugin();
    let path = write(dir.path(), "Dirty.esp", &original);
    let registry = sample_registry().unwrap();

    let report = FogFixer::new(FogFixOptions::default())
        .fix_file(&DefaultPluginSource, &path, &mut NullProgress)
        .unwrap();
    assert_eq!(report.fixed_cells, vec![FormId(FOG_CELL_FID), FormId(0x0100_0C03)]);
    let backup = report.backup.expect("默认创建备份");
    assert_eq!(std::fs::read(&backup).unwrap(), original);

    let fixed = std::fs::read(&path).unwrap();
    assert_eq!(report.bytes_written, fixed.len() as u64);

    // 未压缩的单元格只有近雾距变化
    let edid = b"Foggy2\0";
    let at = fixed.windows(edid.len()).position(|w| w == edid).unwrap() + edid.len() + 6 + 12;
    assert_eq!(f32_at(&fixed, at), 0.0001);
    let original_at = original.windows(edid.len()).position(|w| w == edid).unwrap() + edid.len() + 6 + 12;
    assert_eq!(fixed.len() - at, original.len() - original_at);
    assert_eq!(fixed[at + 4..], original[original_at + 4..]);

    let rescan = ModCleaner::new(&registry, &DefaultPluginSource)
        .with_flags(CleanFlags::FOG)
        .scan(&path, &mut NullProgress)
        .unwrap();
    assert!(rescan.fog.is_empty());

    // 第二次修复不会改动文件
    let again = FogFixer::new(FogFixOptions {
        backup: false,
        ..FogFixOptions::default()
    })
    .fix_file(&DefaultPluginSource, &path, &mut NullProgress)
    .unwrap();
    assert!(again.fixed_cells.is_empty());
    assert_eq!(std::fs::read(&path).unwrap(), fixed);
}
