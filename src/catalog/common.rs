//! 示例记录目录
//!
//! 只覆盖插件头、游戏设置、单元格、世界空间和两种引用记录，供命令行工具
//! 和测试使用。完整的游戏目录是数据，不属于引擎本身。

use super::RecordRegistry;
use crate::elements::{Element, Field, NumKind};
use crate::melset::MelSet;
use crate::utils::Result;

/// 插件头
pub fn tes4() -> Result<MelSet> {
    MelSet::new(vec![
        Element::structure(
            b"HEDR",
            "fiI",
            vec![
                Field::new("version").with_default(1.7f32),
                Field::new("numRecords"),
                Field::new("nextObject").with_default(0x800i64),
            ],
        )?,
        Element::base(b"OFST", "ofst"),
        Element::base(b"DELE", "dele"),
        Element::string(b"CNAM", "author"),
        Element::string(b"SNAM", "description"),
        Element::groups(
            "masters",
            vec![Element::string(b"MAST", "name"), Element::num(b"DATA", "size", NumKind::U64)],
        )?,
        Element::base(b"ONAM", "overrides"),
        Element::base(b"SCRN", "screenshot"),
        Element::num(b"INTV", "internalVersion", NumKind::U32),
        Element::num(b"INCC", "incc", NumKind::U32),
    ])
}

/// 游戏设置（值的类型由编辑器ID首字母决定，这里保持原始数据）
pub fn gmst() -> Result<MelSet> {
    MelSet::new(vec![Element::string(b"EDID", "eid"), Element::base(b"DATA", "value")])
}

/// XCLL 光照数据的前36字节布局
pub const LIGHTING_LAYOUT: &str = "=12s2f2l2f";

pub fn cell() -> Result<MelSet> {
    MelSet::new(vec![
        Element::string(b"EDID", "eid"),
        Element::lstring(b"FULL", "full"),
        Element::base(b"DATA", "cellFlags"),
        Element::structure(
            b"XCLC",
            "2iI",
            vec![Field::new("posX"), Field::new("posY"), Field::new("landHideFlags")],
        )?,
        Element::optional_struct(
            b"XCLL",
            LIGHTING_LAYOUT,
            vec![
                Field::new("colors"),
                Field::new("fogNear"),
                Field::new("fogFar"),
                Field::new("rotXY"),
                Field::new("rotZ"),
                Field::new("directionalFade"),
                Field::new("fogClip"),
            ],
        )?,
        Element::fid(b"LTMP", "lightTemplate"),
        Element::num(b"XCLW", "waterHeight", NumKind::F32),
        Element::fid(b"XCCM", "climate"),
        Element::fid(b"XCWT", "water"),
        Element::fid(b"XOWN", "owner"),
        Element::num(b"XRNK", "rank", NumKind::I32),
        Element::fid(b"XEZN", "encounterZone"),
        Element::fid(b"XLCN", "location"),
    ])
}

pub fn wrld() -> Result<MelSet> {
    MelSet::new(vec![
        Element::string(b"EDID", "eid"),
        Element::lstring(b"FULL", "full"),
        Element::fid(b"WNAM", "parent"),
        Element::fid(b"CNAM", "climate"),
        Element::fid(b"NAM2", "water"),
        Element::flags(
            b"DATA",
            "flags",
            NumKind::U8,
            &["smallWorld", "noFastTravel", "unknown3", "noLodWater", "noLandscape", "noSky", "fixedDimensions", "noGrass"],
        ),
        Element::structure(b"NAM0", "2f", vec![Field::new("minX"), Field::new("minY")])?,
        Element::structure(b"NAM9", "2f", vec![Field::new("maxX"), Field::new("maxY")])?,
        Element::base(b"OFST", "offsets"),
    ])
}

/// 引用记录共有的位置与父对象
fn placement() -> Result<Vec<Element>> {
    Ok(vec![
        Element::structure(
            b"XESP",
            "IB3s",
            vec![
                Field::fid("enableParent"),
                Field::flags("parentFlags", &["oppositeParent", "popIn"]),
                Field::new("unused"),
            ],
        )?,
        Element::fid(b"XOWN", "owner"),
        Element::num(b"XSCL", "scale", NumKind::F32),
        Element::optional_struct(
            b"DATA",
            "=6f",
            vec![
                Field::new("posX"),
                Field::new("posY"),
                Field::new("posZ"),
                Field::new("rotX"),
                Field::new("rotY"),
                Field::new("rotZ"),
            ],
        )?,
    ])
}

pub fn refr() -> Result<MelSet> {
    let mut elements = vec![
        Element::string(b"EDID", "eid"),
        Element::fid(b"NAME", "base"),
        Element::group(
            "teleport",
            vec![
                Element::structure(
                    b"XTEL",
                    "I6f",
                    vec![
                        Field::fid("destination"),
                        Field::new("destPosX"),
                        Field::new("destPosY"),
                        Field::new("destPosZ"),
                        Field::new("destRotX"),
                        Field::new("destRotY"),
                        Field::new("destRotZ"),
                    ],
                )?,
            ],
        )?,
        Element::fid(b"XLKR", "linkedRef"),
    ];
    elements.extend(placement()?);
    MelSet::new(elements)
}

pub fn achr() -> Result<MelSet> {
    let mut elements = vec![
        Element::string(b"EDID", "eid"),
        Element::fid(b"NAME", "base"),
        Element::fid(b"XEZN", "encounterZone"),
        Element::num(b"XPRD", "patrolIdleDelay", NumKind::F32),
        Element::null(b"XPPA"),
        Element::fid(b"INAM", "idle"),
    ];
    elements.extend(placement()?);
    MelSet::new(elements)
}

/// 示例注册表
pub fn sample_registry() -> Result<RecordRegistry> {
    Ok(RecordRegistry::builder()
        .register(b"TES4", tes4()?, false)?
        .register(b"GMST", gmst()?, false)?
        .register(b"CELL", cell()?, false)?
        .register(b"WRLD", wrld()?, false)?
        .register(b"REFR", refr()?, false)?
        .register(b"ACHR", achr()?, false)?
        .build())
}
