mod common;

use common::*;
use strata_mem::AllocKind;
use strata_rt::{EnvOptions, MarshalError, Member, MemoryOptions, StructureDef, StructureKind, Value};

#[test]
fn test_pointer_to_relocatable_target() {
    let mut env = env();
    let pets = define(
        &mut env,
        StructureDef::new("Pets", StructureKind::Struct, 8, 4),
        vec![Member::int("dog", 0, 32), Member::int("cat", 32, 32)],
    );
    let ptr = pointer_to(&mut env, pets.structure(), false);
    let target = env.construct(pets, Some(Value::record([("dog", Value::Int(3))]))).unwrap();
    let pointer = env.construct(ptr, Some(Value::Object(target))).unwrap();

    assert_eq!(env.target(pointer).unwrap(), Some(target));
    assert_eq!(env.value(pointer).unwrap(), Value::Object(target));
    // relocatable targets get their address at call time
    assert_eq!(env.bytes(pointer).unwrap(), &[0; 4]);

    // members not on the pointer are looked up on the target
    assert_eq!(env.get(pointer, "dog").unwrap(), Value::Int(3));
    env.set(pointer, "cat", 4).unwrap();
    assert_eq!(env.get(target, "cat").unwrap(), Value::Int(4));
}

#[test]
fn test_null_pointer() {
    let mut env = env();
    let int = i32_type(&mut env);
    let ptr = pointer_to(&mut env, int.structure(), false);
    let pointer = env.construct(ptr, None).unwrap();
    assert_eq!(env.target(pointer).unwrap(), None);
    assert_eq!(env.value(pointer).unwrap(), Value::Null);

    let target = env.construct(int, Some(Value::Int(1))).unwrap();
    env.assign(pointer, Value::Object(target)).unwrap();
    env.assign(pointer, Value::Null).unwrap();
    assert_eq!(env.target(pointer).unwrap(), None);
}

#[test]
fn test_pointer_into_fixed_memory() {
    let mut env = env();
    let int = i32_type(&mut env);
    let ptr = pointer_to(&mut env, int.structure(), false);
    let view = env.memory_mut().allocate_fixed_view(4, 4, AllocKind::Heap).unwrap();
    let address = env.memory().get_address(view).unwrap();
    write_u32(&mut env, address, 77);

    let pointer = env.cast_bytes(ptr, (address as u32).to_le_bytes().to_vec()).unwrap();
    let target = env.target(pointer).unwrap().unwrap();
    assert_eq!(env.view_of(target).unwrap(), view);
    assert_eq!(env.value(target).unwrap(), Value::Int(77));
    assert_eq!(env.address_of(target).unwrap(), address);
}

#[test]
fn test_uninitialized_pointer() {
    let mut env = env();
    let int = i32_type(&mut env);
    let ptr = pointer_to(&mut env, int.structure(), false);
    let pointer = env.cast_bytes(ptr, vec![0xaa; 4]).unwrap();
    assert!(matches!(
        env.target(pointer),
        Err(MarshalError::UninitializedPointer { address: 0xaaaa_aaaa, count: 1, .. })
    ));

    // with no elements the same address is just an empty slice
    let slice = i32_slice(&mut env);
    let fat = pointer_to(&mut env, slice.structure(), false);
    let mut bytes = vec![0xaa; 4];
    bytes.extend_from_slice(&[0; 4]);
    let pointer = env.cast_bytes(fat, bytes).unwrap();
    let target = env.target(pointer).unwrap().unwrap();
    assert_eq!(env.length(target).unwrap(), 0);

    let mut bytes = vec![0xaa; 4];
    bytes.extend_from_slice(&2u32.to_le_bytes());
    let pointer = env.cast_bytes(fat, bytes).unwrap();
    assert!(matches!(
        env.target(pointer),
        Err(MarshalError::UninitializedPointer { count: 2, .. })
    ));
}

#[test]
fn test_target_type_is_checked() {
    let mut env = env();
    let int = i32_type(&mut env);
    let array = u32_array(&mut env, 2);
    let ptr = pointer_to(&mut env, int.structure(), false);
    let pointer = env.construct(ptr, None).unwrap();
    let wrong = env.construct(array, None).unwrap();
    assert!(matches!(
        env.set_target(pointer, Some(wrong)),
        Err(MarshalError::InvalidType { .. })
    ));
}

#[test]
fn test_slice_pointer_from_initializer() {
    let mut env = env();
    let slice = i32_slice(&mut env);
    let fat = pointer_to(&mut env, slice.structure(), false);
    let pointer = env.construct(fat, Some(Value::from(vec![1, 2, 3]))).unwrap();
    let target = env.target(pointer).unwrap().unwrap();
    assert_eq!(env.length(target).unwrap(), 3);
    // the element count is written even before the address is known
    assert_eq!(&env.bytes(pointer).unwrap()[4..], &3u32.to_le_bytes());
}

#[test]
fn test_resident_objects_are_addressed_immediately() {
    let mut env = env_with(EnvOptions {
        memory: MemoryOptions {
            resident: true,
            ..MemoryOptions::default()
        },
        ..EnvOptions::default()
    });
    let int = i32_type(&mut env);
    let ptr = pointer_to(&mut env, int.structure(), false);
    let target = env.construct(int, Some(Value::Int(11))).unwrap();
    let address = env.address_of(target).unwrap();
    assert_eq!(read_u32(&env, address), 11);

    let pointer = env.construct(ptr, Some(Value::Object(target))).unwrap();
    assert_eq!(env.bytes(pointer).unwrap(), &(address as u32).to_le_bytes());
}

#[test]
fn test_template_pointers_are_reset() {
    let mut env = env();
    let int = i32_type(&mut env);
    let ptr = pointer_to(&mut env, int.structure(), false);
    let holder = define_with_template(
        &mut env,
        StructureDef::new("Holder", StructureKind::Struct, 8, 4),
        vec![
            Member::object("ptr", 0, 4, 0, ptr.structure()),
            Member::int("count", 32, 32),
        ],
        vec![0x10, 0x20, 0, 0, 5, 0, 0, 0],
    );
    let object = env.construct(holder, None).unwrap();
    assert_eq!(env.bytes(object).unwrap(), &[0, 0, 0, 0, 5, 0, 0, 0]);
    let pointer = env.get(object, "ptr").unwrap().as_object().unwrap();
    assert_eq!(env.target(pointer).unwrap(), None);
}

#[test]
fn test_copy_carries_pointer_targets() {
    let mut env = env();
    let int = i32_type(&mut env);
    let ptr = pointer_to(&mut env, int.structure(), false);
    let holder = define(
        &mut env,
        StructureDef::new("Holder", StructureKind::Struct, 4, 4),
        vec![Member::object("ptr", 0, 4, 0, ptr.structure())],
    );
    let target = env.construct(int, Some(Value::Int(5))).unwrap();
    let first = env.construct(holder, Some(Value::record([("ptr", Value::Object(target))]))).unwrap();
    let second = env.construct(holder, Some(Value::Object(first))).unwrap();
    let pointer = env.get(second, "ptr").unwrap().as_object().unwrap();
    assert_eq!(env.target(pointer).unwrap(), Some(target));
}

#[test]
fn test_optional_pointer_uses_null_as_absent() {
    let mut env = env();
    let int = i32_type(&mut env);
    let ptr = pointer_to(&mut env, int.structure(), false);
    let maybe = define(
        &mut env,
        StructureDef::new("?*i32", StructureKind::Optional, 4, 4),
        vec![Member::object("value", 0, 4, 0, ptr.structure())],
    );
    let object = env.construct(maybe, None).unwrap();
    assert_eq!(env.value(object).unwrap(), Value::Null);

    let target = env.construct(int, Some(Value::Int(2))).unwrap();
    env.assign(object, Value::Object(target)).unwrap();
    let pointer = env.value(object).unwrap().as_object().unwrap();
    assert_eq!(env.target(pointer).unwrap(), Some(target));

    env.assign(object, Value::Null).unwrap();
    assert_eq!(env.value(object).unwrap(), Value::Null);
}

#[test]
fn test_foreign_slice_count_cannot_overflow() {
    let mut env = env_with(EnvOptions {
        address_size: 8,
        ..EnvOptions::default()
    });
    let slice = i32_slice(&mut env);
    let fat = define(
        &mut env,
        StructureDef::new("[]i32 ptr", StructureKind::Pointer, 16, 8),
        vec![Member::object("target", 0, 8, 0, slice.structure())],
    );
    let pointer_with = |env: &mut strata_rt::Environment, count: u64| {
        let mut bytes = 0x2000u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&count.to_le_bytes());
        env.cast_bytes(fat, bytes).unwrap()
    };

    let pointer = pointer_with(&mut env, u64::MAX);
    assert!(matches!(env.target(pointer), Err(MarshalError::OutOfBounds { .. })));

    // the byte length fits but the end address does not
    let pointer = pointer_with(&mut env, u64::MAX / 4);
    assert!(matches!(env.target(pointer), Err(MarshalError::OutOfBounds { .. })));
}
