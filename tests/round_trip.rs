//! 整个插件的加载、修改与重建

mod common;

use common::*;
use esp_engine::catalog::common::sample_registry;
use esp_engine::group::GroupType;
use esp_engine::{FormId, Plugin, RecordFlags, Value};

fn sample_plugin() -> Vec<u8> {
    let cell_fid = 0x0100_0C01u32;
    let mut xtel = Vec::new();
    xtel.extend(0x0100_0D01u32.to_le_bytes());
    for v in [1.0f32, 2.0, 3.0, 0.0, 0.0, 1.5] {
        xtel.extend(v.to_le_bytes());
    }
    let refr = record(
        b"REFR",
        0x0100_0801,
        RecordFlags::empty(),
        &[(b"EDID", b"DoorRef\0"), (b"NAME", &0x0000_1F2Au32.to_le_bytes()), (b"XTEL", &xtel)],
    );
    let cell = record(
        b"CELL",
        cell_fid,
        RecordFlags::COMPRESSED,
        &[(b"EDID", b"Cellar\0"), (b"XCLL", &lighting(10.0, 2000.0, 0.0))],
    );
    let children = group(cell_fid.to_le_bytes(), GroupType::CellPersistentChildren, &[refr]);
    let block = group(0u32.to_le_bytes(), GroupType::InteriorBlock, &[cell, children]);

    let mut bytes = tes4(&["Skyrim.esm"]);
    bytes.extend(top(
        b"GMST",
        &[record(b"GMST", 0x0100_0001, RecordFlags::empty(), &[(b"EDID", b"fTest\0"), (b"DATA", &[0, 0, 0x80, 0x3F])])],
    ));
    bytes.extend(top(b"KYWD", &[record(b"KYWD", 0x0100_0002, RecordFlags::empty(), &[(b"EDID", b"Unknown\0")])]));
    bytes.extend(top(b"CELL", &[block]));
    bytes
}

fn load(bytes: &[u8]) -> (tempfile::TempDir, Plugin) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Sample.esp");
    std::fs::write(&path, bytes).unwrap();
    let plugin = Plugin::load(&path, &sample_registry().unwrap()).unwrap();
    (dir, plugin)
}

#[test]
fn test_untouched_plugin_rebuilds_identically() {
    let bytes = sample_plugin();
    let (dir, mut plugin) = load(&bytes);

    assert_eq!(plugin.masters, vec!["Skyrim.esm".to_string()]);
    let stats = plugin.stats();
    assert_eq!(stats.record_count, 5);
    assert_eq!(stats.group_count, 5);
    assert!(!plugin.is_master());

    let out = dir.path().join("Rebuilt.esp");
    plugin.write_to_file(&out).unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), bytes);
}

#[test]
fn test_mutation_survives_reload() {
    let (dir, mut plugin) = load(&sample_plugin());
    {
        let refr = plugin
            .records_mut()
            .into_iter()
            .find(|r| r.form_id() == FormId(0x0100_0801))
            .unwrap();
        assert_eq!(refr.get_attr("base").unwrap(), Value::FormId(FormId(0x1F2A)));
        refr.set_attr("base", FormId(0x0100_0F00)).unwrap();
        refr.set_attr("eid", "RenamedDoor").unwrap();
    }
    let out = dir.path().join("Changed.esp");
    plugin.write_to_file(&out).unwrap();

    let mut reloaded = Plugin::load(&out, &sample_registry().unwrap()).unwrap();
    let refr = reloaded
        .records_mut()
        .into_iter()
        .find(|r| r.form_id() == FormId(0x0100_0801))
        .unwrap();
    assert_eq!(refr.get_attr("base").unwrap(), Value::FormId(FormId(0x0100_0F00)));
    assert_eq!(refr.get_attr("eid").unwrap(), Value::Str("RenamedDoor".into()));
    let teleport = refr.get_attr("teleport").unwrap();
    assert_eq!(
        teleport.as_group().and_then(|g| g.get("destPosZ")).cloned(),
        Some(Value::Float(3.0))
    );
}

#[test]
fn test_oversized_subrecord_round_trip() {
    let payload: Vec<u8> = (0..70000u32).map(|i| (i % 251) as u8).collect();
    let mut bytes = tes4(&[]);
    bytes.extend(top(
        b"GMST",
        &[record(b"GMST", 0x0100_0001, RecordFlags::empty(), &[(b"EDID", b"sHuge\0"), (b"DATA", &payload)])],
    ));
    // 数据前有 XXXX 子记录
    assert!(bytes.windows(4).any(|w| w == b"XXXX"));

    let (dir, mut plugin) = load(&bytes);
    {
        let mut records = plugin.records_mut();
        let gmst = &mut records[0];
        assert_eq!(gmst.get_attr("value").unwrap().as_bytes().map(<[u8]>::len), Some(70000));
        gmst.set_attr("eid", "sHuger").unwrap();
    }
    let out = dir.path().join("Huge.esp");
    plugin.write_to_file(&out).unwrap();

    let written = std::fs::read(&out).unwrap();
    assert!(written.windows(4).any(|w| w == b"XXXX"));
    let mut reloaded = Plugin::load(&out, &sample_registry().unwrap()).unwrap();
    let mut records = reloaded.records_mut();
    let gmst = &mut records[0];
    assert_eq!(gmst.get_attr("value").unwrap().as_bytes(), Some(payload.as_slice()));
    assert_eq!(gmst.editor_id().unwrap().as_deref(), Some("sHuger"));
}

#[test]
fn test_remap_fids_with_and_without_save() {
    let bytes = sample_plugin();
    let (dir, mut plugin) = load(&bytes);

    let mut seen = Vec::new();
    plugin
        .remap_fids(
            &mut |fid| {
                seen.push(fid);
                FormId(0x0200_0000 | fid.object_index())
            },
            false,
        )
        .unwrap();
    assert!(seen.contains(&FormId(0x1F2A)));
    assert!(seen.contains(&FormId(0x0100_0D01)));
    assert_eq!(plugin.to_bytes().unwrap(), bytes);

    let mut calls = 0;
    plugin
        .remap_fids(
            &mut |fid| {
                calls += 1;
                FormId(0x0200_0000 | fid.object_index())
            },
            true,
        )
        .unwrap();
    assert_eq!(calls, seen.len());

    let out = dir.path().join("Remapped.esp");
    plugin.write_to_file(&out).unwrap();
    let mut reloaded = Plugin::load(&out, &sample_registry().unwrap()).unwrap();
    let refr = reloaded
        .records_mut()
        .into_iter()
        .find(|r| r.form_id() == FormId(0x0100_0801))
        .unwrap();
    assert_eq!(refr.get_attr("base").unwrap(), Value::FormId(FormId(0x0200_1F2A)));
}

#[test]
fn test_localized_plugin_keeps_string_ids() {
    let mut nam0 = Vec::new();
    nam0.extend((-4096.0f32).to_le_bytes());
    nam0.extend((-4096.0f32).to_le_bytes());
    let wrld = record(
        b"WRLD",
        0x0100_0E01,
        RecordFlags::empty(),
        &[(b"EDID", b"Frontier\0"), (b"FULL", &0x0000_2B07u32.to_le_bytes()), (b"NAM0", &nam0)],
    );
    let mut bytes = tes4_with_flags(&["Skyrim.esm"], RecordFlags::LOCALIZED);
    bytes.extend(top(b"WRLD", &[wrld]));

    let (dir, mut plugin) = load(&bytes);
    assert!(plugin.is_localized());
    {
        let mut records = plugin.records_mut();
        let wrld = &mut records[0];
        assert_eq!(wrld.get_attr("full").unwrap(), Value::Int(0x2B07));
        wrld.set_attr("minX", -8192.0f32).unwrap();
    }
    let out = dir.path().join("Localized.esm");
    plugin.write_to_file(&out).unwrap();

    let mut reloaded = Plugin::load(&out, &sample_registry().unwrap()).unwrap();
    let mut records = reloaded.records_mut();
    let wrld = &mut records[0];
    assert_eq!(wrld.get_attr("full").unwrap(), Value::Int(0x2B07));
    assert_eq!(wrld.get_attr("minX").unwrap(), Value::Float(-8192.0));
    assert_eq!(wrld.get_attr("eid").unwrap(), Value::from("Frontier"));
}
