// Shared fixtures for the integration tests
#![allow(dead_code)]

use std::collections::HashMap;

use bytes::Bytes;
use shader_archive::archive::header::Revision;
use shader_archive::archive::{
    Attribute, ImageBuffer, Sampler, ShaderUniform, StageLocations, StorageBuffer, SymbolEntry,
    SymbolTable, UniformBlock, Version,
};
use shader_archive::bytecode::{StagePrograms, Variation};
use shader_archive::io::ResDict;
use shader_archive::{
    BytecodeContainer, Container, ShaderCode, ShaderModel, ShaderOption, ShaderProgram,
    ShaderStage,
};

pub const CONTROL_MAGIC: u32 = 0x1234_5679;

/// The major version used for each layout revision.
pub const MAJORS: [u16; 4] = [5, 7, 8, 9];

pub fn version(major: u16) -> Version {
    Version {
        major,
        minor: 1,
        micro: 0,
    }
}

pub fn revision(major: u16) -> Revision {
    Revision::for_version(version(major)).unwrap()
}

pub fn request(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn option(
    name: &str,
    choices: &[&str],
    mask: u32,
    shift: u8,
    index: u8,
    key_offset: u8,
) -> ShaderOption {
    ShaderOption {
        name: name.to_string(),
        choices: choices
            .iter()
            .enumerate()
            .map(|(i, c)| (c.to_string(), i as u32))
            .collect(),
        block_offset: 0,
        flag: 0,
        key_offset,
        bit32_mask: mask,
        bit32_index: index,
        bit32_shift: shift,
    }
}

/// A 0x40-byte control record whose constant block sits at `offset..offset + size`.
pub fn control_record(program_size: u32, constant_offset: u32, constant_size: u32) -> Bytes {
    let mut raw = vec![0u8; 0x40];
    raw[0..4].copy_from_slice(&CONTROL_MAGIC.to_le_bytes());
    raw[0x10..0x14].copy_from_slice(&program_size.to_le_bytes());
    raw[0x14..0x18].copy_from_slice(&constant_offset.to_le_bytes());
    raw[0x18..0x1C].copy_from_slice(&constant_size.to_le_bytes());
    raw[0x30] = 0x7E;
    Bytes::from(raw)
}

/// Stage code whose bytecode ends with an 8-byte constant block at 0x100.
pub fn stage_code(fill: u8) -> ShaderCode {
    let mut bytecode = vec![fill; 0x100];
    bytecode.extend_from_slice(&[fill, 1, 2, 3, 4, 5, 6, 7]);
    ShaderCode {
        control: control_record(0x100, 0x100, 8),
        bytecode: Bytes::from(bytecode),
    }
}

fn locations(major: u16, vertex: i32, fragment: i32) -> StageLocations {
    if revision(major).has_two_stage_locations() {
        StageLocations {
            vertex,
            fragment,
            ..StageLocations::default()
        }
    } else {
        StageLocations {
            vertex,
            geometry: -1,
            fragment,
            compute: vertex + 10,
        }
    }
}

fn symbol(major: u16, name: &str) -> SymbolEntry {
    if revision(major) >= Revision::V8 {
        SymbolEntry {
            name: name.to_string(),
            ..SymbolEntry::default()
        }
    } else {
        SymbolEntry {
            name: name.to_string(),
            value: format!("{name}_value"),
            name2: format!("{name}_alt"),
            value2: String::new(),
        }
    }
}

/// Two static options packed in word 0 and one dynamic option in word 1.
///
/// Programs, in order, carry QUALITY/FOG/SKIN:
/// 0: LOW/OFF/NONE, 1: HIGH/OFF/NONE, 2: LOW/ON/FOUR, 3: HIGH/ON/ONE.
/// Programs 0 and 1 share variation 0.
pub fn sample_model(major: u16) -> ShaderModel {
    let rev = revision(major);
    let layout = rev.model_layout();

    let static_options: ResDict<ShaderOption> = [
        option("QUALITY", &["LOW", "HIGH"], 0x1, 0, 0, 0),
        option("FOG", &["OFF", "ON"], 0x2, 1, 0, 0),
    ]
    .into_iter()
    .map(|o| (o.name.clone(), o))
    .collect();
    let dynamic_options: ResDict<ShaderOption> = [option("SKIN", &["NONE", "ONE", "FOUR"], 0x3, 0, 1, 1)]
        .into_iter()
        .map(|o| (o.name.clone(), o))
        .collect();

    let mut attributes = ResDict::new();
    attributes.insert("_p0", Attribute { index: 0, location: 0 });
    attributes.insert("_u0", Attribute { index: 1, location: -1 });

    let mut samplers = ResDict::new();
    samplers.insert("_a0", Sampler { annotation: "albedo".into(), index: 0 });
    samplers.insert("_n0", Sampler { annotation: "normal".into(), index: 1 });

    let mut images = ResDict::new();
    let mut storage_buffers = ResDict::new();
    if layout.images {
        images.insert("_img0", ImageBuffer { annotation: "output".into(), index: 0 });
    }
    if layout.storage_buffers {
        storage_buffers.insert(
            "lights",
            StorageBuffer {
                unknowns: [1, 2, 3, 4, 5, 6, 7, 8],
            },
        );
    }

    let mut uniforms = ResDict::new();
    uniforms.insert(
        "cTint",
        ShaderUniform {
            name: "cTint".into(),
            index: 0,
            data_offset: 1,
            block_index: 0,
        },
    );
    uniforms.insert(
        "cFogRange",
        ShaderUniform {
            name: "cFogRange".into(),
            index: 1,
            data_offset: 17,
            block_index: 0,
        },
    );
    let mut uniform_blocks = ResDict::new();
    uniform_blocks.insert(
        "MaterialParams",
        UniformBlock {
            index: 0,
            kind: 1,
            size: 32,
            uniforms,
            default_buffer: Bytes::from((0u8..32).collect::<Vec<_>>()),
        },
    );
    uniform_blocks.insert(
        "Scene",
        UniformBlock {
            index: 1,
            kind: 2,
            size: 64,
            uniforms: ResDict::new(),
            default_buffer: Bytes::new(),
        },
    );

    let program = |variation_index: i32| ShaderProgram {
        uniform_block_locations: vec![locations(major, 0, 1), locations(major, -1, 2)],
        sampler_locations: vec![locations(major, -1, 0), locations(major, -1, 1)],
        image_locations: if layout.images {
            vec![locations(major, -1, 3)]
        } else {
            Vec::new()
        },
        storage_buffer_locations: if layout.storage_buffers {
            vec![locations(major, 4, 4)]
        } else {
            Vec::new()
        },
        variation_index,
        used_attribute_flags: 0b11,
        flags: variation_index as u32,
    };

    let mut bytecode = BytecodeContainer::new(version(major));
    bytecode.code_target = 0x10;
    bytecode.compiler_version = 2;
    for fill in [0x10u8, 0x20, 0x30] {
        let mut stages = StagePrograms::default();
        stages.set(ShaderStage::Vertex, stage_code(fill));
        stages.set(ShaderStage::Fragment, stage_code(fill + 1));
        bytecode.variations.push(Variation {
            program: Some(stages),
        });
    }
    bytecode.variations.push(Variation { program: None });

    let symbols = SymbolTable {
        samplers: vec![symbol(major, "albedoTex"), symbol(major, "normalTex")],
        images: images.keys().map(|k| symbol(major, k)).collect(),
        uniform_blocks: vec![symbol(major, "MaterialParams"), symbol(major, "Scene")],
        storage_buffers: storage_buffers.keys().map(|k| symbol(major, k)).collect(),
    };

    ShaderModel {
        name: "water".into(),
        static_options,
        dynamic_options,
        attributes,
        samplers,
        images,
        uniform_blocks,
        storage_buffers,
        symbols: Some(symbols),
        bytecode,
        programs: vec![program(0), program(0), program(1), program(2)],
        key_table: vec![0b00, 0, 0b01, 0, 0b10, 2, 0b11, 1],
        default_program_index: 1,
        static_key_length: 1,
        dynamic_key_length: 1,
        unknown2: 0,
        unknown_indices: [0xFF, 1, 0xFF, 3],
        tail: vec![0; layout.tail_len],
    }
}

/// The single-option model: QUALITY in {LOW, HIGH}, programs keyed [0] and [1].
pub fn quality_model(major: u16) -> ShaderModel {
    let mut model = sample_model(major);
    model.static_options = [option("QUALITY", &["LOW", "HIGH"], 0x1, 0, 0, 0)]
        .into_iter()
        .map(|o| (o.name.clone(), o))
        .collect();
    model.dynamic_options = ResDict::new();
    model.dynamic_key_length = 0;
    model.programs.truncate(2);
    model.key_table = vec![0, 1];
    model
}

pub fn sample_container(major: u16) -> Container {
    let mut container = Container::new("fixture", version(major));
    container.path = "shaders/fixture".into();
    container.models.insert("water", sample_model(major));
    let mut lava = sample_model(major);
    lava.name = "lava".into();
    lava.default_program_index = -1;
    container.models.insert("lava", lava);
    container
}
