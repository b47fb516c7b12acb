//! Dispatch behaviour of the host backend through the `Backend` trait object.

use proptest::prelude::*;
use rnnr_backends::{create_backend, Backend, BackendError, BackendKind, HostBackend, LaunchConfig, WorkSize};

fn stamp_backend() -> HostBackend {
    // Writes the linear global index of every item into the output buffer.
    let mut backend = HostBackend::new().with_kernel("stamp", |item, args| {
        let width = args.arg(1)[0] as usize;
        let height = args.arg(1)[1] as usize;
        let index = item.global_id(0) + width * (item.global_id(1) + height * item.global_id(2));
        args.arg_mut(0)[index] += index as f32 + 1.0;
    });
    backend.setup().unwrap();
    backend
}

#[test]
fn test_trait_object_round_trip() -> rnnr_backends::Result<()> {
    let mut backend: Box<dyn Backend + Send> = Box::new(stamp_backend());
    let out = backend.create_buffer(8 * 4, true)?;
    let dims = backend.create_buffer(2 * 4, false)?;
    let kernel = backend.create_kernel("stamp", "__kernel void stamp(__global float *out, __global const float *dims)")?;

    backend.write_buffer(dims, &[8.0, 1.0])?;
    backend.run_kernel(kernel, &LaunchConfig::linear(8, 4), &[out, dims])?;

    let mut result = vec![0.0f32; 8];
    backend.read_buffer(out, &mut result)?;
    assert_eq!(result, (1..=8).map(|v| v as f32).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_factory_host_backend_has_empty_registry() {
    let mut backend = create_backend(BackendKind::Host).unwrap();
    backend.setup().unwrap();
    let err = backend.create_kernel("stamp", "stamp").unwrap_err();
    assert!(matches!(err, BackendError::CompileError { .. }));
}

#[test]
fn test_read_smaller_than_buffer() {
    let mut backend = stamp_backend();
    let buffer = backend.create_buffer(16, false).unwrap();
    backend.write_buffer(buffer, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let mut head = [0.0f32; 2];
    backend.read_buffer(buffer, &mut head).unwrap();
    assert_eq!(head, [1.0, 2.0]);
}

proptest! {
    #[test]
    fn every_work_item_runs_exactly_once(
        groups in (1u64..4, 1u64..4, 1u64..3),
        local in (1u64..4, 1u64..3, 1u64..3),
    ) {
        let global = WorkSize::new(groups.0 * local.0, groups.1 * local.1, groups.2 * local.2);
        let launch = LaunchConfig::new(global, WorkSize::new(local.0, local.1, local.2));
        let items = global.total() as usize;

        let mut backend = stamp_backend();
        let out = backend.create_buffer(items * 4, true).unwrap();
        let dims = backend.create_buffer(8, false).unwrap();
        let kernel = backend.create_kernel("stamp", "stamp").unwrap();
        backend.write_buffer(dims, &[global.x as f32, global.y as f32]).unwrap();
        backend.run_kernel(kernel, &launch, &[out, dims]).unwrap();

        let mut result = vec![0.0f32; items];
        backend.read_buffer(out, &mut result).unwrap();
        for (index, value) in result.iter().enumerate() {
            prop_assert_eq!(*value, index as f32 + 1.0);
        }
    }

    #[test]
    fn indivisible_local_size_is_rejected(global in 2u64..64, local in 2u64..16) {
        prop_assume!(global % local != 0);
        let mut backend = stamp_backend();
        let out = backend.create_buffer(global as usize * 4, true).unwrap();
        let kernel = backend.create_kernel("stamp", "stamp").unwrap();
        let err = backend
            .run_kernel(kernel, &LaunchConfig::linear(global, local), &[out, out])
            .unwrap_err();
        let is_dispatch_failure = matches!(err, BackendError::DispatchFailed { .. });
        prop_assert!(is_dispatch_failure);
    }
}
