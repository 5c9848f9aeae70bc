/*!
 * Network Tests
 * Client and server tasks end to end over loopback TCP
 */

use flowkernel::core::TimeoutReason;
use flowkernel::kernel::{CommTarget, SchedObject};
use flowkernel::protocol::RawMessage;
use flowkernel::task::{ClientTask, Processor, ServerTask, TimerTask};
use flowkernel::workflow::{ParallelWork, Series, SeriesWork, Workflow};
use flowkernel::{EndpointParams, GlobalSettings, Runtime, Server, ServerParams, Task, TaskState};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

type Client = ClientTask<RawMessage, RawMessage>;
type Reply = ServerTask<RawMessage, RawMessage>;
type Outcome = (TaskState, i32, Vec<u8>);

const WAIT: Duration = Duration::from_secs(5);

fn runtime() -> Runtime {
    Runtime::new(GlobalSettings::default()).unwrap()
}

fn echo() -> Processor<RawMessage, RawMessage> {
    Arc::new(|task: &mut Reply, _: &Series| {
        let body = task.req().body().to_vec();
        task.resp().set_body(body);
    })
}

fn serve(runtime: &Runtime, params: ServerParams, processor: Processor<RawMessage, RawMessage>) -> (Server<RawMessage, RawMessage>, SocketAddr) {
    let server = Server::new(runtime, params, processor);
    server.start("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = server.listen_addr().unwrap();
    (server, addr)
}

fn reporting(tx: mpsc::Sender<Outcome>) -> Option<flowkernel::Callback<Client>> {
    Some(Box::new(move |t: &mut Client, _: &Series| {
        tx.send((t.state(), t.error(), t.resp().body().to_vec())).unwrap();
    }))
}

#[test]
fn test_echo_round_trip() {
    let runtime = runtime();
    let (server, addr) = serve(&runtime, ServerParams::default(), echo());
    let (tx, rx) = mpsc::channel();

    let client = runtime.create_client_task(addr, RawMessage::new("ping"), 0, reporting(tx));
    Workflow::start_series_work(client, None);

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (TaskState::Success, 0, b"ping".to_vec()));
    server.stop();
    runtime.shutdown();
}

#[test]
fn test_keep_alive_connection_reused() {
    let runtime = runtime();
    let (server, addr) = serve(&runtime, ServerParams::default(), echo());
    let (tx, rx) = mpsc::channel();

    let series = Workflow::create_series_work(
        {
            let mut first = runtime.create_client_task(addr, RawMessage::new("one"), 0, reporting(tx.clone()));
            first.set_keep_alive(5_000);
            first
        },
        None,
    );
    let mut second = runtime.create_client_task(addr, RawMessage::new("two"), 0, reporting(tx));
    second.set_keep_alive(5_000);
    series.push_back(second);
    series.start();

    assert_eq!(rx.recv_timeout(WAIT).unwrap().2, b"one".to_vec());
    assert_eq!(rx.recv_timeout(WAIT).unwrap().2, b"two".to_vec());
    assert_eq!(runtime.target(addr).idle_count(), 1);
    assert_eq!(server.conn_count(), 1);

    server.stop();
    runtime.shutdown();
}

#[test]
fn test_reply_completed_by_later_task() {
    let runtime = runtime();
    let comm = runtime.communicator().clone();
    let processor: Processor<RawMessage, RawMessage> = Arc::new(move |task: &mut Reply, series: &Series| {
        let resp = task.shared_resp();
        let body = [b"late:".as_slice(), task.req().body()].concat();
        series.push_back(TimerTask::new(
            comm.clone(),
            Duration::from_millis(30),
            Some(Box::new(move |_: &mut TimerTask, _: &Series| resp.lock().set_body(body))),
        ));
    });
    let (server, addr) = serve(&runtime, ServerParams::default(), processor);
    let (tx, rx) = mpsc::channel();

    let client = runtime.create_client_task(addr, RawMessage::new("x"), 0, reporting(tx));
    Workflow::start_series_work(client, None);

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (TaskState::Success, 0, b"late:x".to_vec()));
    server.stop();
    runtime.shutdown();
}

#[test]
fn test_noreply_closes_connection() {
    let runtime = runtime();
    let processor: Processor<RawMessage, RawMessage> = Arc::new(|task: &mut Reply, _: &Series| task.noreply());
    let (server, addr) = serve(&runtime, ServerParams::default(), processor);
    let (tx, rx) = mpsc::channel();

    let client = runtime.create_client_task(addr, RawMessage::new("ignored"), 0, reporting(tx));
    Workflow::start_series_work(client, None);

    let (state, _, body) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(state, TaskState::SysError);
    assert!(body.is_empty());
    server.stop();
    runtime.shutdown();
}

#[test]
fn test_receive_timeout() {
    let runtime = runtime();
    let comm = runtime.communicator().clone();
    let processor: Processor<RawMessage, RawMessage> = Arc::new(move |_: &mut Reply, series: &Series| {
        series.push_back(TimerTask::new(comm.clone(), Duration::from_millis(500), None));
    });
    let (server, addr) = serve(&runtime, ServerParams::default(), processor);
    let (tx, rx) = mpsc::channel();

    let mut client = runtime.create_client_task(
        addr,
        RawMessage::new("slow"),
        0,
        Some(Box::new(move |t: &mut Client, _: &Series| {
            tx.send((t.state(), t.error(), t.timeout_reason())).unwrap();
        })),
    );
    client.set_receive_timeout(50);
    Workflow::start_series_work(client, None);

    assert_eq!(
        rx.recv_timeout(WAIT).unwrap(),
        (TaskState::SysError, libc::ETIMEDOUT, TimeoutReason::Transmit)
    );
    server.stop();
    runtime.shutdown();
}

#[test]
fn test_connection_refused_after_retries() {
    let runtime = runtime();
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let (tx, rx) = mpsc::channel();

    let client = runtime.create_client_task(
        addr,
        RawMessage::new("nobody home"),
        2,
        Some(Box::new(move |t: &mut Client, _: &Series| {
            tx.send((t.state(), t.error(), t.retries())).unwrap();
        })),
    );
    Workflow::start_series_work(client, None);

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (TaskState::SysError, libc::ECONNREFUSED, 2));
    runtime.shutdown();
}

#[test]
#[serial]
fn test_max_connections_drains_idle() {
    let runtime = runtime();
    let params = ServerParams {
        max_connections: 1,
        ..Default::default()
    };
    let (server, addr) = serve(&runtime, params, echo());
    let (tx, rx) = mpsc::channel();

    let mut first = runtime.create_client_task(addr, RawMessage::new("a"), 0, reporting(tx.clone()));
    first.set_keep_alive(5_000);
    Workflow::start_series_work(first, None);
    assert_eq!(rx.recv_timeout(WAIT).unwrap().0, TaskState::Success);
    assert_eq!(server.conn_count(), 1);

    // A second target forces a fresh connection past the limit
    let other: Arc<dyn SchedObject> = CommTarget::new(addr, &EndpointParams::default());
    let second = runtime.create_client_task_with(other, RawMessage::new("b"), 0, reporting(tx));
    Workflow::start_series_work(second, None);
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (TaskState::Success, 0, b"b".to_vec()));
    assert!(server.conn_count() <= 1);

    server.stop();
    assert_eq!(server.conn_count(), 0);
    runtime.shutdown();
}

#[test]
#[serial]
fn test_stop_waits_for_idle_connections() {
    let runtime = runtime();
    let (server, addr) = serve(&runtime, ServerParams::default(), echo());
    let (tx, rx) = mpsc::channel();

    for body in ["p", "q", "r"] {
        let mut client = runtime.create_client_task_with(
            CommTarget::new(addr, &EndpointParams::default()),
            RawMessage::new(body),
            0,
            reporting(tx.clone()),
        );
        client.set_keep_alive(5_000);
        Workflow::start_series_work(client, None);
    }
    for _ in 0..3 {
        assert_eq!(rx.recv_timeout(WAIT).unwrap().0, TaskState::Success);
    }

    server.stop();
    assert!(server.listen_addr().is_none());
    runtime.shutdown();
}

/// Echo after a short delay, tracking how many requests overlap
fn delayed_echo(runtime: &Runtime, active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Processor<RawMessage, RawMessage> {
    let comm = runtime.communicator().clone();
    Arc::new(move |task: &mut Reply, series: &Series| {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        let resp = task.shared_resp();
        let body = task.req().body().to_vec();
        let active = active.clone();
        series.push_back(TimerTask::new(
            comm.clone(),
            Duration::from_millis(30),
            Some(Box::new(move |_: &mut TimerTask, _: &Series| {
                resp.lock().set_body(body);
                active.fetch_sub(1, Ordering::SeqCst);
            })),
        ));
    })
}

#[test]
#[serial]
fn test_admission_wait_on_handler_thread() {
    let runtime = runtime();
    assert_eq!(runtime.communicator().handler_threads(), 1);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (server, addr) = serve(
        &runtime,
        ServerParams::default(),
        delayed_echo(&runtime, active, peak.clone()),
    );
    let target = CommTarget::new(
        addr,
        &EndpointParams {
            max_connections: 1,
            ..Default::default()
        },
    );
    let (tx, rx) = mpsc::channel();

    // Both clients are dispatched from timer completions, on the handler thread
    let mut parallel = ParallelWork::new(None);
    for body in ["left", "right"] {
        let series = SeriesWork::new(runtime.create_timer_task(Duration::from_millis(10), None), None);
        series.push_back(runtime.create_client_task_with(
            target.clone(),
            RawMessage::new(body),
            0,
            reporting(tx.clone()),
        ));
        parallel.add_series(series);
    }
    Workflow::start_parallel_work(parallel, None);

    let mut bodies: Vec<_> = (0..2)
        .map(|_| {
            let (state, error, body) = rx.recv_timeout(WAIT).unwrap();
            assert_eq!((state, error), (TaskState::Success, 0));
            body
        })
        .collect();
    bodies.sort();
    assert_eq!(bodies, vec![b"left".to_vec(), b"right".to_vec()]);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(target.current_load(), 0);

    server.stop();
    runtime.shutdown();
}

#[test]
#[serial]
fn test_load_ceiling_across_concurrent_clients() {
    let runtime = runtime();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (server, addr) = serve(
        &runtime,
        ServerParams::default(),
        delayed_echo(&runtime, active, peak.clone()),
    );
    let target = CommTarget::with_timeouts(addr, 1_000, 1_000, 1);
    let (tx, rx) = mpsc::channel();

    let starters: Vec<_> = (0..4)
        .map(|i| {
            let client = runtime.create_client_task_with(
                target.clone(),
                RawMessage::new(format!("c{i}")),
                0,
                reporting(tx.clone()),
            );
            std::thread::spawn(move || {
                Workflow::start_series_work(client, None);
            })
        })
        .collect();
    for starter in starters {
        starter.join().unwrap();
    }

    for _ in 0..4 {
        assert_eq!(rx.recv_timeout(WAIT).unwrap().0, TaskState::Success);
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(target.current_load(), 0);

    server.stop();
    runtime.shutdown();
}

#[test]
fn test_admission_without_wait_fails_fast() {
    let runtime = runtime();
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let target = CommTarget::with_timeouts(addr, 1_000, 1_000, 1);
    let held = target.acquire(0).unwrap();
    let (tx, rx) = mpsc::channel();

    let mut client = runtime.create_client_task_with(
        target.clone(),
        RawMessage::new("busy"),
        0,
        Some(Box::new(move |t: &mut Client, _: &Series| {
            tx.send((t.state(), t.error(), t.timeout_reason())).unwrap();
        })),
    );
    client.set_wait_timeout(0);
    Workflow::start_series_work(client, None);

    assert_eq!(
        rx.recv_timeout(WAIT).unwrap(),
        (TaskState::SysError, libc::ETIMEDOUT, TimeoutReason::Wait)
    );
    drop(held);
    runtime.shutdown();
}

#[test]
fn test_send_timeout_during_partial_write() {
    let runtime = runtime();
    // Never accepted and never read; the handshake still completes
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();

    let mut client = runtime.create_client_task(
        addr,
        RawMessage::new(vec![0u8; 64 << 20]),
        0,
        Some(Box::new(move |t: &mut Client, _: &Series| {
            tx.send((t.state(), t.error(), t.timeout_reason())).unwrap();
        })),
    );
    client.set_send_timeout(200);
    Workflow::start_series_work(client, None);

    assert_eq!(
        rx.recv_timeout(WAIT).unwrap(),
        (TaskState::SysError, libc::ETIMEDOUT, TimeoutReason::Transmit)
    );
    drop(listener);
    runtime.shutdown();
}
