//! Enumeration and endpoint 0 behaviors, driven by an emulated host

mod common;

use common::*;
use usb_device::{endpoint::EndpointAddress, UsbDirection};
use usbd_core::{emulated::EmulatedPhy, DeviceState};

#[test]
fn enumerate_and_configure() {
    let mut device = device();
    enumerate(&mut device, 5);

    assert!(device.configured());
    assert_eq!(device.state(), DeviceState::Configured);
    assert_eq!(device.address(), 5);
    assert_eq!(device.phy().address(), 5);
    assert!(device.phy().is_configured());
    assert!(device.phy().is_endpoint_added(ep1_in()));
    assert!(device.phy().is_endpoint_added(ep1_out()));
    assert_eq!(device.class().configured, [1]);

    let mut buffer = [0; 1];
    assert_eq!(control_in(&mut device, get_configuration(), &mut buffer), Ok(1));
    assert_eq!(buffer, [1]);
}

#[test]
fn device_descriptor() {
    let mut device = device();
    reset(&mut device);

    let mut buffer = [0; 64];
    assert_eq!(control_in(&mut device, get_descriptor(1, 0, 64), &mut buffer), Ok(18));
    assert_eq!(buffer[0], 18);
    assert_eq!(buffer[1], 1);
    assert_eq!(&buffer[2..4], &[0x00, 0x02]);
    assert_eq!(buffer[7], 64);
    assert_eq!(&buffer[8..12], &[0x24, 0x58, 0xdd, 0x27]);
    assert_eq!(buffer[17], 3);

    // The host may ask for the first eight bytes only
    let mut short = [0; 8];
    assert_eq!(control_in(&mut device, get_descriptor(1, 0, 8), &mut short), Ok(8));
    assert_eq!(short, buffer[..8]);
}

#[test]
fn configuration_descriptor() {
    let mut device = addressed();
    let mut buffer = [0; 256];

    assert_eq!(control_in(&mut device, get_descriptor(2, 0, 9), &mut buffer), Ok(9));
    let total = usize::from(u16::from_le_bytes([buffer[2], buffer[3]]));
    assert_eq!(buffer[4], 2, "two interfaces");
    assert_eq!(buffer[7], 0xA0);

    assert_eq!(
        control_in(&mut device, get_descriptor(2, 0, 255), &mut buffer),
        Ok(total)
    );
    assert_eq!(&buffer[9..11], &[9, 4]);

    // Second configuration, by index
    assert_eq!(control_in(&mut device, get_descriptor(2, 1, 9), &mut buffer), Ok(9));
    assert_eq!(buffer[5], 2);
    assert_eq!(buffer[7], 0xC0);

    assert_eq!(
        control_in(&mut device, get_descriptor(2, 7, 9), &mut buffer),
        Err(Stalled)
    );
}

#[test]
fn string_descriptors() {
    let mut device = addressed();
    let mut buffer = [0; 256];

    assert_eq!(control_in(&mut device, get_descriptor(3, 0, 255), &mut buffer), Ok(4));
    assert_eq!(&buffer[..4], &[4, 3, 0x09, 0x04]);

    let len = control_in(&mut device, get_descriptor(3, 2, 255), &mut buffer).unwrap();
    assert_eq!(len, 2 + 2 * "loopback".len());
    assert_eq!(&buffer[2..6], &[b'l', 0, b'o', 0]);

    let len = control_in(&mut device, get_descriptor(3, 4, 255), &mut buffer).unwrap();
    assert_eq!(len, 2 + 2 * "Loopback".len());

    assert_eq!(
        control_in(&mut device, get_descriptor(3, 5, 255), &mut buffer),
        Err(Stalled)
    );
}

#[test]
fn high_speed_descriptors_stall() {
    let mut device = addressed();
    let mut buffer = [0; 64];
    // Device qualifier, and other speed configuration
    for kind in [6, 7] {
        assert_eq!(
            control_in(&mut device, get_descriptor(kind, 0, 10), &mut buffer),
            Err(Stalled)
        );
    }
    // The device recovers with the next SETUP
    assert_eq!(control_in(&mut device, get_descriptor(1, 0, 18), &mut buffer), Ok(18));
}

#[test]
fn set_address_applies_after_status() {
    let mut device = device();
    reset(&mut device);

    device.phy_mut().host_setup(set_address(42));
    device.process();
    assert_eq!(device.phy().address(), 0);
    assert_eq!(device.state(), DeviceState::Default);

    let mut status = [0; 0];
    assert_eq!(
        device.phy_mut().host_in_ep0(&mut status),
        usbd_core::emulated::HostResult::Data(0)
    );
    device.process();
    assert_eq!(device.phy().address(), 42);
    assert_eq!(device.state(), DeviceState::Addressed);

    assert_eq!(control_out(&mut device, set_address(128), &[]), Err(Stalled));
    assert_eq!(device.address(), 42);
}

#[test]
fn configuration_round_trip() {
    let mut device = addressed();
    let mut buffer = [0; 1];

    control_in(&mut device, get_configuration(), &mut buffer).unwrap();
    assert_eq!(buffer, [0]);

    control_out(&mut device, set_configuration(2), &[]).unwrap();
    control_in(&mut device, get_configuration(), &mut buffer).unwrap();
    assert_eq!(buffer, [2]);
    assert!(device.phy().is_endpoint_added(EndpointAddress::from(0x84)));
    assert!(!device.phy().is_endpoint_added(ep1_in()));

    control_out(&mut device, set_configuration(1), &[]).unwrap();
    assert!(!device.phy().is_endpoint_added(EndpointAddress::from(0x84)));
    assert!(device.phy().is_endpoint_added(ep1_in()));

    control_out(&mut device, set_configuration(0), &[]).unwrap();
    control_in(&mut device, get_configuration(), &mut buffer).unwrap();
    assert_eq!(buffer, [0]);
    assert_eq!(device.state(), DeviceState::Addressed);
    assert!(device.endpoints().is_empty());
    assert!(!device.phy().is_configured());
    assert_eq!(device.class().configured, [2, 1, 0]);

    assert_eq!(control_out(&mut device, set_configuration(9), &[]), Err(Stalled));
    assert_eq!(device.state(), DeviceState::Addressed);
}

#[test]
fn set_configuration_needs_an_address() {
    let mut device = device();
    reset(&mut device);
    assert_eq!(control_out(&mut device, set_configuration(1), &[]), Err(Stalled));
    assert_eq!(device.state(), DeviceState::Default);
}

#[test]
fn unsupported_configuration_stays_addressed() {
    let mut device = device();
    enumerate(&mut device, 3);

    assert_eq!(control_out(&mut device, set_configuration(3), &[]), Err(Stalled));
    assert_eq!(device.state(), DeviceState::Addressed);
    assert!(device.endpoints().is_empty());
    assert!(!device.phy().is_endpoint_added(ep1_in()));
    assert_eq!(device.class().configured, [1, 0]);
}

#[test]
fn alternate_settings() {
    let mut device = device();
    enumerate(&mut device, 5);
    let ep2_in = EndpointAddress::from(0x82);
    let ep3_out = EndpointAddress::from(0x03);
    let mut buffer = [0; 1];

    control_out(&mut device, set_interface(0, 1), &[]).unwrap();
    assert!(device.phy().is_endpoint_added(ep2_in));
    assert_eq!(device.alternate_setting(0), Some(1));
    control_in(&mut device, get_interface(0), &mut buffer).unwrap();
    assert_eq!(buffer, [1]);

    control_out(&mut device, set_interface(1, 1), &[]).unwrap();
    assert!(device.phy().is_endpoint_added(ep3_out));

    // Endpoint 9 can't be isochronous; the previous setting stays
    assert_eq!(control_out(&mut device, set_interface(1, 2), &[]), Err(Stalled));
    assert_eq!(device.alternate_setting(1), Some(1));
    assert!(device.phy().is_endpoint_added(ep3_out));
    control_in(&mut device, get_interface(1), &mut buffer).unwrap();
    assert_eq!(buffer, [1]);

    // Undeclared interface, and alternate setting
    assert_eq!(control_out(&mut device, set_interface(0, 5), &[]), Err(Stalled));
    assert_eq!(control_out(&mut device, set_interface(2, 0), &[]), Err(Stalled));
    assert_eq!(control_in(&mut device, get_interface(2), &mut buffer), Err(Stalled));
    assert_eq!(device.alternate_setting(2), None);

    control_out(&mut device, set_interface(0, 0), &[]).unwrap();
    assert!(!device.phy().is_endpoint_added(ep2_in));
    assert_eq!(device.class().interfaces, [(0, 1), (1, 1), (0, 0)]);

    // SetConfiguration returns every interface to alternate setting 0
    control_out(&mut device, set_configuration(1), &[]).unwrap();
    assert_eq!(device.alternate_setting(1), Some(0));
    assert!(!device.phy().is_endpoint_added(ep3_out));
}

#[test]
fn interface_requests_need_a_configuration() {
    let mut device = addressed();
    let mut buffer = [0; 2];
    assert_eq!(control_out(&mut device, set_interface(0, 0), &[]), Err(Stalled));
    assert_eq!(control_in(&mut device, get_interface(0), &mut buffer), Err(Stalled));
    assert_eq!(control_in(&mut device, get_status(INTERFACE, 0), &mut buffer), Err(Stalled));
}

#[test]
fn endpoint_halt() {
    let mut device = device();
    enumerate(&mut device, 5);
    let mut status = [0; 2];

    control_in(&mut device, get_status(ENDPOINT, 0x81), &mut status).unwrap();
    assert_eq!(status, [0, 0]);

    control_out(&mut device, set_feature(ENDPOINT, 0, 0x81), &[]).unwrap();
    assert!(device.phy().is_endpoint_stalled(ep1_in()));
    assert!(device.endpoints().get(ep1_in()).unwrap().halted);
    control_in(&mut device, get_status(ENDPOINT, 0x81), &mut status).unwrap();
    assert_eq!(status, [1, 0]);

    let mut packet = [0; 64];
    assert_eq!(
        device.phy_mut().host_in(1, &mut packet),
        usbd_core::emulated::HostResult::Stall
    );

    control_out(&mut device, clear_feature(ENDPOINT, 0, 0x81), &[]).unwrap();
    assert!(!device.phy().is_endpoint_stalled(ep1_in()));
    control_in(&mut device, get_status(ENDPOINT, 0x81), &mut status).unwrap();
    assert_eq!(status, [0, 0]);

    // Endpoint 0 can't be halted, and unknown endpoints stall
    assert_eq!(
        control_out(&mut device, set_feature(ENDPOINT, 0, 0x80), &[]),
        Err(Stalled)
    );
    control_out(&mut device, clear_feature(ENDPOINT, 0, 0x00), &[]).unwrap();
    assert_eq!(
        control_in(&mut device, get_status(ENDPOINT, 0x85), &mut status),
        Err(Stalled)
    );
}

#[test]
fn device_status_and_remote_wakeup() {
    let mut device = device();
    enumerate(&mut device, 5);
    let mut status = [0; 2];

    control_in(&mut device, get_status(DEVICE, 0), &mut status).unwrap();
    assert_eq!(status, [0, 0]);

    control_out(&mut device, set_feature(DEVICE, 1, 0), &[]).unwrap();
    assert!(device.remote_wakeup_enabled());
    control_in(&mut device, get_status(DEVICE, 0), &mut status).unwrap();
    assert_eq!(status, [2, 0]);

    control_out(&mut device, clear_feature(DEVICE, 1, 0), &[]).unwrap();
    assert!(!device.remote_wakeup_enabled());

    // Test modes are high speed only
    assert_eq!(control_out(&mut device, set_feature(DEVICE, 2, 0), &[]), Err(Stalled));

    // The second configuration is self powered
    control_out(&mut device, set_configuration(2), &[]).unwrap();
    control_in(&mut device, get_status(DEVICE, 0), &mut status).unwrap();
    assert_eq!(status, [1, 0]);
}

#[test]
fn control_data_sizes() {
    for max_packet_size in [8, 64] {
        let mut device = attached(
            builder(EmulatedPhy::new())
                .max_packet_size_0(max_packet_size)
                .build()
                .unwrap(),
        );
        enumerate(&mut device, 5);

        for len in [1, 7, 8, 9, 63, 64, 65, 128, 255, 256] {
            let data: Vec<u8> = (0..len).map(|byte| byte as u8 ^ 0x5A).collect();
            control_out(&mut device, store(len as u16), &data).unwrap();
            assert_eq!(device.class().len, len);

            // wLength longer than the reply, so short replies end with a ZLP
            let mut buffer = [0; 512];
            assert_eq!(control_in(&mut device, load(512), &mut buffer), Ok(len));
            assert_eq!(&buffer[..len], &data[..]);

            // wLength shorter than the reply
            let short = len / 2;
            if short > 0 {
                assert_eq!(control_in(&mut device, load(short as u16), &mut buffer), Ok(short));
                assert_eq!(&buffer[..short], &data[..short]);
            }
        }
    }
}

#[test]
fn out_data_stage_over_buffer_stalls() {
    let mut device = device();
    enumerate(&mut device, 5);
    let data = [0; 300];
    assert_eq!(control_out(&mut device, store(300), &data), Err(Stalled));
    assert_eq!(device.class().len, 0);
}

#[test]
fn repeated_setup_completes_once() {
    let mut device = device();
    enumerate(&mut device, 5);
    control_out(&mut device, store(3), &[1, 2, 3]).unwrap();
    let before = device.class().control_requests;

    for _ in 0..3 {
        device.phy_mut().host_setup(load(64));
    }
    device.process();
    assert_eq!(device.class().control_requests, before + 1);

    let mut packet = [0; 64];
    assert_eq!(
        device.phy_mut().host_in_ep0(&mut packet),
        usbd_core::emulated::HostResult::Data(3)
    );
    assert_eq!(&packet[..3], &[1, 2, 3]);
}

#[test]
fn unknown_requests_stall() {
    let mut device = device();
    enumerate(&mut device, 5);
    let mut buffer = [0; 8];

    // Vendor request the class doesn't know
    assert_eq!(
        control_in(&mut device, setup(0xC0, 0x7F, 0, 0, 8), &mut buffer),
        Err(Stalled)
    );
    // Class request; the loopback only takes vendor requests
    assert_eq!(control_out(&mut device, setup(0x21, 0x01, 0, 0, 0), &[]), Err(Stalled));
    // SetDescriptor, and SynchFrame
    assert_eq!(control_out(&mut device, setup(0x00, 7, 0x0100, 0, 0), &[]), Err(Stalled));
    assert_eq!(
        control_in(&mut device, setup(0x82, 12, 0, 0x81, 2), &mut buffer),
        Err(Stalled)
    );
    // Standard request in the wrong direction
    assert_eq!(control_out(&mut device, setup(0x00, 6, 0x0100, 0, 0), &[]), Err(Stalled));

    assert!(device.configured());
    assert_eq!(control_in(&mut device, get_configuration(), &mut buffer), Ok(1));
}

#[test]
fn requests_without_data_stage_reject_data() {
    let mut device = addressed();

    assert_eq!(
        control_out(&mut device, setup(0x00, 9, 1, 0, 2), &[0, 0]),
        Err(Stalled)
    );
    assert!(!device.configured());
    assert_eq!(
        control_out(&mut device, setup(0x00, 5, 7, 0, 1), &[0]),
        Err(Stalled)
    );
    assert_eq!(device.address(), 5);

    control_out(&mut device, set_configuration(1), &[]).unwrap();
    assert_eq!(
        control_out(&mut device, setup(0x02, 3, 0, 0x81, 2), &[0, 0]),
        Err(Stalled)
    );
    assert!(!device.endpoints().get(ep1_in()).unwrap().halted);
    assert_eq!(
        control_out(&mut device, setup(0x01, 11, 1, 0, 1), &[0]),
        Err(Stalled)
    );
    assert_eq!(device.alternate_setting(0), Some(0));
    assert_eq!(
        control_out(&mut device, setup(0x00, 3, 1, 0, 2), &[0, 0]),
        Err(Stalled)
    );
    assert!(!device.remote_wakeup_enabled());
    assert!(device.configured());
}

#[test]
fn wide_request_fields_stall() {
    let mut device = device();
    enumerate(&mut device, 5);
    let mut status = [0; 2];

    assert_eq!(
        control_out(&mut device, setup(0x00, 9, 0x0101, 0, 0), &[]),
        Err(Stalled)
    );
    assert_eq!(device.configuration(), 1);
    assert_eq!(device.class().configured, [1]);

    assert_eq!(
        control_out(&mut device, set_interface(0x0100, 1), &[]),
        Err(Stalled)
    );
    assert_eq!(
        control_out(&mut device, set_interface(0, 0x0101), &[]),
        Err(Stalled)
    );
    assert_eq!(device.alternate_setting(0), Some(0));
    assert_eq!(control_in(&mut device, get_interface(0x0100), &mut status), Err(Stalled));

    assert_eq!(
        control_out(&mut device, set_feature(ENDPOINT, 0, 0x0181), &[]),
        Err(Stalled)
    );
    assert!(!device.endpoints().get(ep1_in()).unwrap().halted);
    assert_eq!(
        control_in(&mut device, get_status(ENDPOINT, 0x0181), &mut status),
        Err(Stalled)
    );
}

#[test]
fn bulk_loopback() {
    let mut device = device();
    enumerate(&mut device, 5);

    for packet in [&[1u8, 2, 3][..], &[0xAA; 64][..], &[][..]] {
        assert_eq!(
            device.phy_mut().host_out(1, packet),
            usbd_core::emulated::HostResult::Ack
        );
        device.process();

        let mut echo = [0; 64];
        assert_eq!(
            device.phy_mut().host_in(1, &mut echo),
            usbd_core::emulated::HostResult::Data(packet.len())
        );
        device.process();
        assert_eq!(&echo[..packet.len()], packet);
    }
    let ep = EndpointAddress::from_parts(1, UsbDirection::Out);
    assert!(device.endpoints().get(ep).unwrap().pending);
}
