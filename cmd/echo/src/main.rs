//! # SEDA Echo Server
//!
//! Single reactor thread echoing every byte back to its sender.
//!
//! With `--framed`, each connection also runs a length-field decoder over
//! its input (4-byte big-endian length prefix, header included in the
//! length) and pushes one event per complete frame to a `frames` stage.
//! The stage threads count frames and, on a timer, send their counters back
//! to the reactor through its injection queue, where they are logged.
//!
//! Connections idle for `--idle-ms` are closed by a per-handler timer.
//! Closed connection handlers return to a pool and are reused.
//!
//! ## Usage
//!
//!     cargo run -p seda-echo --release -- [--port 9999] [--framed] [--stage-threads 2]
//!
//! ## Test
//!
//!     echo "hello" | nc -q1 localhost 9999
//!     printf '\x00\x00\x00\x09hello' | nc -q1 localhost 9999   # one frame

use seda::{
    env_get, env_get_bool, log_debug, log_error, log_info, log_warn, DecoderConfig, EventHeader,
    EventLoop, EventRecord, IoHandler, LengthFieldDecoder, LoopConfig, LoopContext,
    LoopEventHandler, LoopHandle, NewHandler, PooledSource, RawEvent, Reusable, RuntimeContext, Stage,
    StageConfig, StageContext, StageHandler, TimerHandle, TimerTarget,
};

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Configuration ──

const RECV_BUF_SIZE: usize = 4096;
/// Stop reading from a peer that does not drain its echoes
const MAX_PENDING_OUT: usize = 1 << 20;
const REPORT_INTERVAL_MS: u64 = 5_000;

static RUNNING: AtomicBool = AtomicBool::new(true);
static TOTAL_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static BYTES_ECHOED: AtomicU64 = AtomicU64::new(0);
static IDLE_CLOSES: AtomicU64 = AtomicU64::new(0);

extern "C" fn handle_sigint(_: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

// ── Frame event ──

#[repr(C)]
#[derive(Clone, Copy)]
struct FrameEvent {
    header: EventHeader,
    conn: u64,
    len: u64,
}

unsafe impl EventRecord for FrameEvent {
    const TYPE_ID: u32 = 1;
}

/// Stage thread counters, injected into the reactor.
#[repr(C)]
#[derive(Clone, Copy)]
struct FrameReport {
    header: EventHeader,
    thread: u64,
    frames: u64,
    bytes: u64,
    largest: u64,
}

unsafe impl EventRecord for FrameReport {
    const TYPE_ID: u32 = 2;
}

// ── Frames stage ──

struct FrameCounter {
    reactor: LoopHandle,
    frames: u64,
    bytes: u64,
    largest: u64,
}

impl StageHandler for FrameCounter {
    fn handle_open(&mut self, ctx: &mut StageContext<'_>) {
        if let Err(e) = ctx.set_timer(REPORT_INTERVAL_MS, 0, true) {
            log_warn!("frames[{}]: no report timer: {}", ctx.thread_index(), e);
        }
    }

    fn handle_event(&mut self, event: RawEvent<'_>, _ctx: &mut StageContext<'_>) {
        if let Some(frame) = event.decode::<FrameEvent>() {
            self.frames += 1;
            self.bytes += frame.len;
            self.largest = self.largest.max(frame.len);
        }
    }

    fn handle_timeout(&mut self, _param: u64, ctx: &mut StageContext<'_>) {
        if self.frames == 0 {
            return;
        }
        let report = FrameReport {
            header: EventHeader::for_record::<FrameReport>(ctx.now_us()),
            thread: ctx.thread_index() as u64,
            frames: self.frames,
            bytes: self.bytes,
            largest: self.largest,
        };
        if let Err(e) = self.reactor.push_event(&report) {
            log_warn!("frames[{}]: report dropped: {}", ctx.thread_index(), e);
        }
    }

    fn handle_close(&mut self, ctx: &mut StageContext<'_>) {
        log_info!("frames[{}]: final frames={} bytes={}", ctx.thread_index(), self.frames, self.bytes);
    }
}

// ── Connection handler ──

struct Conn {
    fd: RawFd,
    out: Vec<u8>,
    decoder: Option<LengthFieldDecoder>,
    frames: Option<Arc<Stage>>,
    idle_ms: u64,
    idle_timer: Option<TimerHandle>,
}

impl Conn {
    fn new(frames: Option<Arc<Stage>>, idle_ms: u64) -> Self {
        let decoder = frames
            .as_ref()
            .and_then(|_| LengthFieldDecoder::new(DecoderConfig::new()).ok());
        Self {
            fd: -1,
            out: Vec::new(),
            decoder,
            frames,
            idle_ms,
            idle_timer: None,
        }
    }

    fn attach(&mut self, fd: RawFd) {
        self.fd = fd;
    }

    /// Echo `data`, buffering what the socket does not take right now.
    fn echo(&mut self, data: &[u8], ctx: &mut LoopContext<'_>) -> i32 {
        let mut sent = 0;
        if self.out.is_empty() {
            match write_some(self.fd, data) {
                Ok(n) => sent = n,
                Err(_) => return -1,
            }
        }
        BYTES_ECHOED.fetch_add(sent as u64, Ordering::Relaxed);
        if sent < data.len() {
            self.out.extend_from_slice(&data[sent..]);
            let interest = if self.out.len() > MAX_PENDING_OUT {
                seda::Interest::WRITE
            } else {
                seda::Interest::READ_WRITE
            };
            ctx.set_interest(interest);
        }
        0
    }

    fn arm_idle(&mut self, ctx: &mut LoopContext<'_>) {
        match ctx.set_timer(self.idle_ms, 0, false) {
            Ok(handle) => self.idle_timer = Some(handle),
            Err(e) => {
                log_warn!("conn {}: no idle timer: {}", self.fd, e);
                self.idle_timer = None;
            }
        }
    }

    /// Restart the idle countdown; re-arm if the timer is no longer pending.
    fn touch_idle(&mut self, ctx: &mut LoopContext<'_>) {
        let Some(handle) = self.idle_timer else {
            return;
        };
        if let Err(e) = ctx.update_timer(handle) {
            log_debug!("conn {}: idle timer lost ({}), re-arming", self.fd, e);
            self.arm_idle(ctx);
        }
    }

    fn decode(&mut self, data: &[u8]) -> i32 {
        let (Some(decoder), Some(stage)) = (self.decoder.as_mut(), self.frames.as_ref()) else {
            return 0;
        };
        let conn = self.fd as u64;
        let result = decoder.decode(data, |frame| {
            let event = FrameEvent {
                header: EventHeader::for_record::<FrameEvent>(stage.now_us()),
                conn,
                len: frame.len() as u64,
            };
            if let Err(e) = stage.push_event(&event) {
                log_warn!("conn {}: frame dropped: {}", conn, e);
            }
        });
        match result {
            Ok(_) => 0,
            Err(e) => {
                log_warn!("conn {}: bad framing: {}", conn, e);
                -1
            }
        }
    }
}

impl Reusable for Conn {
    fn reset(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
        }
        self.fd = -1;
        self.out.clear();
        self.idle_timer = None;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.reset();
        }
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.reset();
    }
}

impl IoHandler for Conn {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn handle_open(&mut self, ctx: &mut LoopContext<'_>) -> i32 {
        TOTAL_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        if self.idle_ms > 0 {
            self.arm_idle(ctx);
        }
        0
    }

    fn handle_read(&mut self, ctx: &mut LoopContext<'_>) -> i32 {
        let mut buf = [0u8; RECV_BUF_SIZE];
        loop {
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n == 0 {
                return -1;
            }
            if n < 0 {
                let err = std::io::Error::last_os_error();
                return match err.raw_os_error() {
                    Some(libc::EAGAIN) | Some(libc::EINTR) => 0,
                    _ => -1,
                };
            }
            let data = &buf[..n as usize];
            self.touch_idle(ctx);
            if self.decode(data) < 0 || self.echo(data, ctx) < 0 {
                return -1;
            }
            if !ctx.interest().is_readable() {
                return 0;
            }
        }
    }

    fn handle_write(&mut self, ctx: &mut LoopContext<'_>) -> i32 {
        let n = match write_some(self.fd, &self.out) {
            Ok(n) => n,
            Err(_) => return -1,
        };
        BYTES_ECHOED.fetch_add(n as u64, Ordering::Relaxed);
        self.out.drain(..n);
        if self.out.is_empty() {
            ctx.set_interest(seda::Interest::READ);
        } else if self.out.len() <= MAX_PENDING_OUT {
            ctx.set_interest(seda::Interest::READ_WRITE);
        }
        0
    }

    fn handle_timeout(&mut self, _param: u64, _ctx: &mut LoopContext<'_>) -> i32 {
        IDLE_CLOSES.fetch_add(1, Ordering::Relaxed);
        -1
    }

    fn handle_close(&mut self, _ctx: &mut LoopContext<'_>) {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Bytes written; 0 when the socket would block.
fn write_some(fd: RawFd, data: &[u8]) -> std::io::Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    let n = unsafe {
        libc::send(
            fd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
            libc::MSG_NOSIGNAL,
        )
    };
    if n >= 0 {
        return Ok(n as usize);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(0),
        _ => Err(err),
    }
}

// ── Listener handler ──

struct Listener {
    fd: RawFd,
    pool: Arc<PooledSource<Conn>>,
}

impl IoHandler for Listener {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn handle_read(&mut self, ctx: &mut LoopContext<'_>) -> i32 {
        loop {
            let fd = unsafe {
                libc::accept4(
                    self.fd,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if fd < 0 {
                let err = std::io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                    _ => log_error!("accept: {}", err),
                }
                return 0;
            }
            let mut conn = self.pool.acquire();
            conn.attach(fd);
            ctx.add_handler(NewHandler::boxed(conn).source(self.pool.clone()));
        }
    }

    fn handle_close(&mut self, _ctx: &mut LoopContext<'_>) {
        log_info!("listener closed");
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

// ── Stats reporter ──

struct Reporter {
    last_bytes: u64,
}

impl LoopEventHandler for Reporter {
    fn handle_event(&mut self, event: RawEvent<'_>, _ctx: &mut LoopContext<'_>) {
        if let Some(report) = event.decode::<FrameReport>() {
            log_info!(
                "frames[{}]: frames={} bytes={} largest={}",
                report.thread,
                report.frames,
                report.bytes,
                report.largest
            );
        }
    }

    fn handle_timeout(&mut self, _param: u64, _ctx: &mut LoopContext<'_>) {
        let bytes = BYTES_ECHOED.load(Ordering::Relaxed);
        let rate = (bytes - self.last_bytes) as f64 / (REPORT_INTERVAL_MS as f64 / 1000.0);
        log_info!(
            "active={} total_conns={} echoed={}B rate={:.0}B/s idle_closed={}",
            ACTIVE_CONNECTIONS.load(Ordering::Relaxed),
            TOTAL_CONNECTIONS.load(Ordering::Relaxed),
            bytes,
            rate,
            IDLE_CLOSES.load(Ordering::Relaxed)
        );
        self.last_bytes = bytes;
    }
}

// ── Setup listener (blocking syscalls, startup only) ──

fn setup_listener(port: u16) -> std::io::Result<RawFd> {
    unsafe {
        let fd = libc::socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        );
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let opt: libc::c_int = 1;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &opt as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );

        let mut addr: libc::sockaddr_in = std::mem::zeroed();
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr.s_addr = 0; // INADDR_ANY
        addr.sin_port = port.to_be();

        let rc = libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of_val(&addr) as libc::socklen_t,
        );
        if rc != 0 || libc::listen(fd, 1024) != 0 {
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }
        Ok(fd)
    }
}

// ── Main ──

fn main() {
    seda::init_logging();
    let args: Vec<String> = std::env::args().collect();

    // Phase 1: env vars
    let mut port: u16 = env_get("SEDA_ECHO_PORT", 9999);
    let mut framed = env_get_bool("SEDA_ECHO_FRAMED", false);
    let mut stage_threads: usize = env_get("SEDA_ECHO_STAGE_THREADS", 2);
    let mut idle_ms: u64 = env_get("SEDA_ECHO_IDLE_MS", 60_000);

    // Phase 2: CLI flags override env vars
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if let Some(p) = args.get(i).and_then(|s| s.parse().ok()) { port = p; }
            }
            "--framed" => framed = true,
            "--stage-threads" => {
                i += 1;
                if let Some(n) = args.get(i).and_then(|s| s.parse().ok()) { stage_threads = n; }
            }
            "--idle-ms" => {
                i += 1;
                if let Some(ms) = args.get(i).and_then(|s| s.parse().ok()) { idle_ms = ms; }
            }
            _ => {}
        }
        i += 1;
    }

    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_sigint as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    if let Err(e) = run(port, framed, stage_threads, idle_ms) {
        log_error!("seda-echo: {}", e);
        std::process::exit(1);
    }
}

fn run(port: u16, framed: bool, stage_threads: usize, idle_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = RuntimeContext::new();

    let loop_config = LoopConfig::from_env();
    let mut event_loop: EventLoop = EventLoop::open(loop_config, &runtime)?;
    event_loop.set_loop_handler(Reporter { last_bytes: 0 });
    event_loop.set_timer(REPORT_INTERVAL_MS, TimerTarget::Loop { param: 0 }, true)?;

    let frames = if framed {
        let config = StageConfig::from_env("frames")
            .thread_count(stage_threads)
            .timer_enabled(true);
        let reactor = event_loop.handle();
        let stage = Stage::open(config, &runtime, |_| FrameCounter {
            reactor: reactor.clone(),
            frames: 0,
            bytes: 0,
            largest: 0,
        })?;
        Some(Arc::new(stage))
    } else {
        None
    };

    let pool_frames = frames.clone();
    let pool = Arc::new(PooledSource::new(
        event_loop.config().max_handles,
        move || Conn::new(pool_frames.clone(), idle_ms),
    ));

    let fd = setup_listener(port)?;
    event_loop.add_handler(NewHandler::new(Listener {
        fd,
        pool: Arc::clone(&pool),
    }))?;

    log_info!(
        "seda-echo: port={} backend={} framed={} idle_ms={}",
        port,
        event_loop.backend(),
        framed,
        idle_ms
    );

    while RUNNING.load(Ordering::Relaxed) {
        event_loop.run_once(Some(Duration::from_millis(200)))?;
    }

    event_loop.shutdown();
    let stats = event_loop.stats();
    log_info!(
        "seda-echo: shutdown polls={} io_events={} opened={} closed={} pooled={} reused={}",
        stats.polls,
        stats.io_events,
        stats.opened,
        stats.closed,
        pool.created(),
        pool.reused()
    );
    if let Some(stage) = frames {
        stage.close();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socketpair() -> (RawFd, RawFd) {
        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        for &fd in &fds {
            unsafe {
                let fl = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK);
            }
        }
        (fds[0], fds[1])
    }

    /// Drops the connection's idle timer before each read reaches it.
    struct LosesTimer(Conn);

    impl IoHandler for LosesTimer {
        fn fd(&self) -> RawFd {
            self.0.fd()
        }

        fn handle_open(&mut self, ctx: &mut LoopContext<'_>) -> i32 {
            self.0.handle_open(ctx)
        }

        fn handle_read(&mut self, ctx: &mut LoopContext<'_>) -> i32 {
            if let Some(handle) = self.0.idle_timer {
                ctx.cancel_timer(handle).unwrap();
            }
            self.0.handle_read(ctx)
        }

        fn handle_close(&mut self, ctx: &mut LoopContext<'_>) {
            self.0.handle_close(ctx)
        }
    }

    #[test]
    fn test_idle_timer_rearmed_when_lost() {
        let config = LoopConfig::new()
            .max_handles(4)
            .max_timeout(Duration::from_millis(50));
        let mut lp: EventLoop = EventLoop::open(config, &RuntimeContext::new()).unwrap();
        let (a, b) = socketpair();
        let mut conn = Conn::new(None, 60_000);
        conn.attach(a);
        lp.add_handler(NewHandler::new(LosesTimer(conn))).unwrap();
        assert_eq!(lp.pending_timers(), 1);

        let n = unsafe { libc::write(b, b"hi".as_ptr() as *const libc::c_void, 2) };
        assert_eq!(n, 2);
        lp.run_once(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(lp.pending_timers(), 1);

        let mut buf = [0u8; 8];
        let n = unsafe { libc::read(b, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        assert_eq!(&buf[..n as usize], b"hi");
        unsafe { libc::close(b) };
    }
}
