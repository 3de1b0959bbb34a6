//! Character device tests: descriptor flow, framing and bus sharing

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rs_iobus::hal::mock::{Frame, MockDelay, MockI2c};
use rs_iobus::{
    Ack, BusCharDevice, BusConfig, CharDeviceConfig, ControlRequest, Direction, Error,
    FlushPolicy, Message, Pca9685, Pca9685Config, SharedBus,
};

fn setup(addresses: &[u8]) -> (MockI2c, Arc<SharedBus<MockI2c>>, BusCharDevice<MockI2c>) {
    let mock = MockI2c::new();
    for a in addresses {
        mock.add_device(*a);
    }
    let bus = Arc::new(SharedBus::new(mock.clone(), BusConfig::default()));
    bus.initialize().unwrap();
    let dev = BusCharDevice::new(
        Arc::clone(&bus),
        &CharDeviceConfig::default().with_path("/dev/bus0"),
    );
    (mock, bus, dev)
}

// ============================================================================
// End-to-end
// ============================================================================

#[test]
fn bind_then_write_is_one_transaction() {
    let (mock, _bus, dev) = setup(&[0x40]);
    assert_eq!(dev.path(), "/dev/bus0");

    let fd = dev.open("/dev/bus0").unwrap();
    dev.control_request(fd, ControlRequest::BindAddress(0x40)).unwrap();
    assert_eq!(dev.write(fd, &[0x00, 0x11]), Ok(2));

    let log = mock.transactions();
    assert_eq!(log.len(), 1);
    assert_eq!(
        log[0].frames,
        vec![
            Frame::Start,
            Frame::Address(0x40, Direction::Write),
            Frame::Write(vec![0x00, 0x11]),
            Frame::Stop,
        ]
    );
    assert_eq!(mock.register(0x40, 0x00), 0x11);
}

#[test]
fn unbound_descriptor_differs_from_absent_device() {
    let (_mock, _bus, dev) = setup(&[]);
    let fd = dev.open("/dev/bus0").unwrap();

    let unbound = dev.write(fd, &[0x00]).unwrap_err();
    assert_eq!(unbound, Error::InvalidDescriptor(fd));
    assert!(!unbound.is_bus_fault());

    dev.control_request(fd, ControlRequest::BindAddress(0x40)).unwrap();
    let absent = dev.write(fd, &[0x00]).unwrap_err();
    assert!(absent.is_bus_fault());
}

#[test]
fn char_device_before_bus_init_fails() {
    let mock = MockI2c::new();
    mock.add_device(0x40);
    let bus = Arc::new(SharedBus::new(mock, BusConfig::default()));
    let dev = BusCharDevice::new(bus, &CharDeviceConfig::default());
    let fd = dev.open("/dev/i2c").unwrap();
    dev.control_request(fd, ControlRequest::BindAddress(0x40)).unwrap();
    assert_eq!(dev.write(fd, &[0x00]), Err(Error::BusNotInitialized));
}

// ============================================================================
// Read framing
// ============================================================================

#[test]
fn multi_byte_atomic_read_is_one_compound_transaction() {
    let (mock, _bus, dev) = setup(&[0x40]);
    for (i, v) in [0x11, 0x22, 0x33, 0x44].iter().enumerate() {
        mock.set_register(0x40, 0x06 + i as u8, *v);
    }
    let fd = dev.open("/dev/bus0").unwrap();
    dev.control_request(fd, ControlRequest::BindAddress(0x40)).unwrap();

    let mut buf = [0u8; 4];
    let mut messages = [Message::write(&[0x06]), Message::read(&mut buf)];
    dev.control_request(fd, ControlRequest::AtomicTransfer(&mut messages))
        .unwrap();
    assert_eq!(buf, [0x11, 0x22, 0x33, 0x44]);

    let log = mock.transactions();
    assert_eq!(log.len(), 1);
    assert_eq!(
        log[0].frames,
        vec![
            Frame::Start,
            Frame::Address(0x40, Direction::Write),
            Frame::Write(vec![0x06]),
            Frame::Start,
            Frame::Address(0x40, Direction::Read),
            Frame::Read(3, Ack::Ack),
            Frame::Read(1, Ack::Nack),
            Frame::Stop,
        ]
    );
}

#[test]
fn single_byte_read_omits_ack_phase() {
    let (mock, _bus, dev) = setup(&[0x40]);
    let fd = dev.open("/dev/bus0").unwrap();
    dev.control_request(fd, ControlRequest::BindAddress(0x40)).unwrap();

    let mut buf = [0u8; 1];
    dev.read(fd, &mut buf).unwrap();
    let log = mock.transactions();
    assert!(!log[0].frames.iter().any(|f| matches!(f, Frame::Read(_, Ack::Ack))));
    assert!(log[0].frames.contains(&Frame::Read(1, Ack::Nack)));
}

// ============================================================================
// Sharing the bus with the PWM driver
// ============================================================================

#[test]
fn char_device_reads_pwm_registers() {
    let (mock, bus, dev) = setup(&[0x40]);
    let pwm = Pca9685::new(
        Arc::clone(&bus),
        Pca9685Config::default()
            .with_frequency_hz(50)
            .with_flush_policy(FlushPolicy::Deferred),
    )
    .initialize(&mut MockDelay::new())
    .unwrap();
    assert_eq!(mock.configure_count(), 1);

    pwm.set_duty(0, 4096).unwrap();
    pwm.flush();

    let fd = dev.open("/dev/bus0").unwrap();
    let mut prescale = [0u8; 1];
    let mut led0 = [0u8; 4];
    let mut messages = [
        Message::write(&[0xFE]).to(0x40),
        Message::read(&mut prescale).to(0x40),
        Message::write(&[0x06]).to(0x40),
        Message::read(&mut led0).to(0x40),
    ];
    dev.control_request(fd, ControlRequest::AtomicTransfer(&mut messages))
        .unwrap();
    assert_eq!(prescale, [121]);
    assert_eq!(led0, [0x00, 0x10, 0x00, 0x00]);
}

#[test]
fn concurrent_users_never_overlap_on_the_wire() {
    let (mock, bus, dev) = setup(&[0x40, 0x50]);
    let pwm = Pca9685::new(Arc::clone(&bus), Pca9685Config::default())
        .initialize(&mut MockDelay::new())
        .unwrap();
    mock.clear_log();
    // Long enough on the wire that an unlocked caller would collide
    mock.set_hold(Duration::from_micros(200));

    thread::scope(|s| {
        s.spawn(|| {
            for step in 0..200u32 {
                pwm.set_duty((step % 16) as usize, step * 20).unwrap();
            }
        });
        for register in 0..3u8 {
            let dev = &dev;
            s.spawn(move || {
                let fd = dev.open("/dev/bus0").unwrap();
                dev.control_request(fd, ControlRequest::BindAddress(0x50)).unwrap();
                for i in 0..40u8 {
                    dev.write(fd, &[register, i]).unwrap();
                }
                dev.close(fd).unwrap();
            });
        }
        s.spawn(|| {
            let fd = dev.open("/dev/bus0").unwrap();
            for _ in 0..40 {
                let mut mode1 = [0u8; 1];
                let mut messages = [
                    Message::write(&[0x00]).to(0x40),
                    Message::read(&mut mode1).to(0x40),
                ];
                dev.control_request(fd, ControlRequest::AtomicTransfer(&mut messages))
                    .unwrap();
            }
        });
    });
    assert!(pwm.wait_idle(Duration::from_secs(10)));

    assert_eq!(mock.overlaps(), 0);
    for t in mock.transactions() {
        assert_eq!(t.frames.first(), Some(&Frame::Start));
        assert_eq!(t.frames.last(), Some(&Frame::Stop));
    }
    assert_eq!(mock.transactions_to(0x50).len(), 120);
    for register in 0..3u8 {
        assert_eq!(mock.register(0x50, register), 39);
    }
}
