//! Cluster-wide behavior of the replication primitives.
//!
//! Each simulated node runs on its own thread over a `LocalMultiplexer`
//! cluster; the final test covers the same behavior over loopback TCP.

use setu_cluster::{
    ChildIndexCounter, GatherOp, LocalMultiplexer, MulticastPipe, Multiplexer, TcpMultiplexer,
    ThreadSynchronizer,
};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

fn spawn_nodes<F, R>(num_nodes: usize, body: F) -> Vec<R>
where
    F: Fn(Arc<dyn Multiplexer>) -> R + Send + Sync + 'static,
    R: Send + 'static,
{
    let nodes = LocalMultiplexer::cluster(num_nodes).unwrap();
    let body = Arc::new(body);
    let handles: Vec<_> = nodes
        .into_iter()
        .map(|node| {
            let body = Arc::clone(&body);
            thread::spawn(move || body(Arc::new(node) as Arc<dyn Multiplexer>))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn broadcast_delivers_identical_value_to_every_slave() {
    let results = spawn_nodes(4, |mux| {
        let is_master = mux.is_master();
        let mut pipe = MulticastPipe::new(mux).unwrap();
        let mut value: u64 = if is_master { 0x0123_4567_89AB_CDEF } else { 0 };
        pipe.broadcast(&mut value).unwrap();
        value
    });
    for value in results {
        assert_eq!(value, 0x0123_4567_89AB_CDEF);
    }
}

#[test]
fn gather_max_is_identical_on_every_node() {
    // Per-node inputs 10, 3, 42, 7; every node must see 42
    let results = spawn_nodes(4, |mux| {
        let inputs = [10u32, 3, 42, 7];
        mux.gather(inputs[mux.node_index()], GatherOp::Max).unwrap()
    });
    assert_eq!(results, vec![42, 42, 42, 42]);
}

#[test]
fn gather_with_one_node_returns_local_value() {
    let results = spawn_nodes(1, |mux| mux.gather(99, GatherOp::Max).unwrap());
    assert_eq!(results, vec![99]);
}

#[test]
fn gather_sum_accumulates_all_contributions() {
    let results = spawn_nodes(3, |mux| {
        mux.gather(mux.node_index() as u32 + 1, GatherOp::Sum).unwrap()
    });
    assert_eq!(results, vec![6, 6, 6]);
}

#[test]
fn thread_synchronizer_converges_on_max_spawn_count() {
    // Nodes spawn {0, 3, 1} children between checkpoints; after sync every
    // counter must have advanced by 3, and the next child index must match.
    let results = spawn_nodes(3, |mux| {
        let spawn_counts = [0u32, 3, 1];
        let counter = ChildIndexCounter::new();
        let mut guard = ThreadSynchronizer::new(Some(mux.clone()), &counter);

        for _ in 0..spawn_counts[mux.node_index()] {
            counter.allocate_child_index();
        }
        guard.sync().unwrap();
        let after_sync = counter.get_next_child_index();

        // A child spawned on any node after the checkpoint gets this index
        let next_child = counter.allocate_child_index();

        // Teardown checkpoint runs in drop; it must also converge (all
        // nodes spawned exactly one child since sync, so no padding).
        drop(guard);
        (after_sync, next_child, counter.get_next_child_index())
    });

    for (after_sync, next_child, final_index) in results {
        assert_eq!(after_sync, 3);
        assert_eq!(next_child, 3);
        assert_eq!(final_index, 4);
    }
}

#[test]
fn thread_synchronizer_teardown_pads_unsynced_interval() {
    let results = spawn_nodes(2, |mux| {
        let spawn_counts = [2u32, 5];
        let counter = ChildIndexCounter::new();
        {
            let _guard = ThreadSynchronizer::new(Some(mux.clone()), &counter);
            for _ in 0..spawn_counts[mux.node_index()] {
                counter.allocate_child_index();
            }
            // No explicit sync; the destructor checkpoint must pad
        }
        counter.get_next_child_index()
    });
    assert_eq!(results, vec![5, 5]);
}

#[test]
fn slaves_reconstruct_write_order_regardless_of_chunking() {
    // Master writes varied-size records with interleaved flushes; slaves
    // read with different chunk sizes and must reconstruct the exact
    // concatenation.
    let mut expected: Vec<u8> = Vec::new();
    for record in 0u8..20 {
        let len = 1 + (record as usize * 7) % 96;
        expected.extend(std::iter::repeat(record).take(len));
    }
    let expected = Arc::new(expected);

    let check = Arc::clone(&expected);
    let results = spawn_nodes(3, move |mux| {
        let is_master = mux.is_master();
        let mut pipe = MulticastPipe::with_packet_size(mux.clone(), 32).unwrap();
        if is_master {
            let mut offset = 0;
            for record in 0u8..20 {
                let len = 1 + (record as usize * 7) % 96;
                pipe.write_data(&check[offset..offset + len]).unwrap();
                offset += len;
                if record % 5 == 4 {
                    pipe.flush().unwrap();
                }
            }
            pipe.flush().unwrap();
            check.to_vec()
        } else {
            // Node 1 reads in 1-byte sips, node 2 in 13-byte gulps
            let chunk = if mux.node_index() == 1 { 1 } else { 13 };
            let mut received = vec![0u8; check.len()];
            let mut offset = 0;
            while offset < received.len() {
                let take = chunk.min(received.len() - offset);
                pipe.read_data(&mut received[offset..offset + take]).unwrap();
                offset += take;
            }
            received
        }
    });

    for received in results {
        assert_eq!(received, *expected);
    }
}

#[test]
fn tcp_cluster_broadcasts_and_gathers() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
        handles.push(thread::spawn(move || {
            let mux: Arc<dyn Multiplexer> = Arc::new(TcpMultiplexer::slave(addr).unwrap());
            let reduced = mux.gather(mux.node_index() as u32 * 10, GatherOp::Max).unwrap();

            let mut pipe = MulticastPipe::new(mux).unwrap();
            let mut value = 0u32;
            pipe.broadcast(&mut value).unwrap();
            let mut tail = vec![0u8; 5];
            pipe.read_data(&mut tail).unwrap();
            (reduced, value, tail)
        }));
    }

    let mux: Arc<dyn Multiplexer> =
        Arc::new(TcpMultiplexer::master_from_listener(listener, 2, 8).unwrap());
    assert_eq!(mux.num_nodes(), 3);
    let reduced = mux.gather(0, GatherOp::Max).unwrap();
    assert_eq!(reduced, 20);

    let mut pipe = MulticastPipe::new(mux).unwrap();
    let mut value = 7u32;
    pipe.broadcast(&mut value).unwrap();
    pipe.write_data(b"hello").unwrap();
    pipe.flush().unwrap();

    for handle in handles {
        let (slave_reduced, slave_value, tail) = handle.join().unwrap();
        assert_eq!(slave_reduced, 20);
        assert_eq!(slave_value, 7);
        assert_eq!(tail, b"hello");
    }
}
