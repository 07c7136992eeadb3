// Shared structure builders for runtime integration tests

#![allow(dead_code)]

use strata_mem::MemoryProvider;
use strata_rt::{
    Constructor, EnvOptions, Environment, Member, StructureDef, StructureIndex, StructureKind, Template,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn env() -> Environment {
    init_logger();
    Environment::new(EnvOptions::default())
}

pub fn env_with(options: EnvOptions) -> Environment {
    init_logger();
    Environment::new(options)
}

/// Defines and finalizes a structure in one go.
pub fn define(env: &mut Environment, def: StructureDef, members: Vec<Member>) -> Constructor {
    let index = env.begin_structure(def);
    for member in members {
        env.attach_member(index, member).expect("attach member");
    }
    env.finalize_structure(index).expect("finalize structure")
}

pub fn define_with_template(
    env: &mut Environment,
    def: StructureDef,
    members: Vec<Member>,
    template: Vec<u8>,
) -> Constructor {
    let index = env.begin_structure(def);
    for member in members {
        env.attach_member(index, member).expect("attach member");
    }
    env.attach_template(index, Template::new(template)).expect("attach template");
    env.finalize_structure(index).expect("finalize structure")
}

pub fn enumeration(env: &mut Environment, name: &str, items: &[(&str, i128)]) -> Constructor {
    named_set(env, name, StructureKind::Enumeration, items)
}

pub fn error_set(env: &mut Environment, name: &str, items: &[(&str, i128)]) -> Constructor {
    named_set(env, name, StructureKind::ErrorSet, items)
}

fn named_set(env: &mut Environment, name: &str, kind: StructureKind, items: &[(&str, i128)]) -> Constructor {
    let index = env.begin_structure(StructureDef::new(name, kind, 2, 2));
    env.attach_member(index, Member::uint("value", 0, 16)).expect("attach member");
    for (item, value) in items {
        env.attach_item(index, item, *value).expect("attach item");
    }
    env.finalize_structure(index).expect("finalize structure")
}

pub fn i32_type(env: &mut Environment) -> Constructor {
    define(
        env,
        StructureDef::new("i32", StructureKind::Primitive, 4, 4),
        vec![Member::int("value", 0, 32)],
    )
}

/// `[count]u32`
pub fn u32_array(env: &mut Environment, count: usize) -> Constructor {
    define(
        env,
        StructureDef::new(&format!("[{}]u32", count), StructureKind::Array, 4 * count, 4),
        vec![Member::uint("element", 0, 32)],
    )
}

/// `[]i32`
pub fn i32_slice(env: &mut Environment) -> Constructor {
    define(
        env,
        StructureDef::new("[]i32", StructureKind::Slice, 4, 4),
        vec![Member::int("element", 0, 32)],
    )
}

/// Pointer to `target`; a fat pointer when `target` is a slice.
pub fn pointer_to(env: &mut Environment, target: StructureIndex, is_const: bool) -> Constructor {
    let fat = env.structures().get(target).map(|s| s.kind == StructureKind::Slice).unwrap_or(false);
    let size = if fat { 8 } else { 4 };
    let mut def = StructureDef::new("*T", StructureKind::Pointer, size, 4);
    if is_const {
        def = def.constant();
    }
    define(env, def, vec![Member::object("target", 0, 4, 0, target)])
}

/// Argument struct holding one pointer per entry of `pointers`, 4 bytes
/// apart (8 for fat pointers), followed by a 32-bit `retval`.
pub fn arg_struct(env: &mut Environment, pointers: &[Constructor]) -> Constructor {
    let mut members = Vec::new();
    let mut offset = 0;
    for (slot, ptr) in pointers.iter().enumerate() {
        let size = env.structures().get(ptr.structure()).map(|s| s.byte_size).unwrap_or(4);
        members.push(Member::object(&format!("arg{}", slot), offset * 8, size, slot, ptr.structure()));
        offset += size;
    }
    members.push(Member::int("retval", offset * 8, 32));
    define(
        env,
        StructureDef::new("Args", StructureKind::ArgStruct, offset + 4, 4),
        members,
    )
}

/// Reads a little-endian u32 out of fixed memory.
pub fn read_u32(env: &Environment, address: usize) -> u32 {
    let bytes = env.memory().provider().bytes(address, 4).expect("readable");
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub fn write_u32(env: &mut Environment, address: usize, value: u32) {
    let bytes = env.memory_mut().provider_mut().bytes_mut(address, 4).expect("writable");
    bytes.copy_from_slice(&value.to_le_bytes());
}
