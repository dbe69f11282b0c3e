//! Puts a stack of dumb-buffer layers on the first lit crtc, letting the
//! allocator decide which of them land on hardware planes.
//!
//! The crtc must already have a mode configured (e.g. by the console or
//! a previous compositor); this demo deliberately performs no modeset.

use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsFd, BorrowedFd};
use std::{thread, time::Duration};

use drm::buffer::DrmFourcc;
use drm::control::{connector, framebuffer, AtomicCommitFlags, Device as ControlDevice};
use drm::Device as DrmDevice;
use skylift::{AtomicRequest, Device};

struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl DrmDevice for Card {}
impl ControlDevice for Card {}

const TILE_COLORS: [u32; 3] = [0xffcc4444, 0xff44cc44, 0xff4444cc];
const TILE_SIZE: u32 = 256;

fn create_fb(
    card: &Card,
    width: u32,
    height: u32,
    color: u32,
) -> Result<framebuffer::Handle, Box<dyn std::error::Error>> {
    let mut db = card.create_dumb_buffer((width, height), DrmFourcc::Xrgb8888, 32)?;
    {
        let mut map = card.map_dumb_buffer(&mut db)?;
        for pixel in map.as_mut().chunks_exact_mut(4) {
            pixel.copy_from_slice(&color.to_le_bytes());
        }
    }
    Ok(card.add_framebuffer(&db, 24, 32)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let card = Card(OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/dri/card0")?);
    card.set_client_capability(drm::ClientCapability::UniversalPlanes, true)?;
    card.set_client_capability(drm::ClientCapability::Atomic, true)?;

    let res = card.resource_handles()?;
    let connector = res
        .connectors()
        .iter()
        .flat_map(|handle| card.get_connector(*handle, true))
        .find(|info| info.state() == connector::State::Connected)
        .ok_or("no connected connector")?;
    let crtc = res
        .crtcs()
        .iter()
        .flat_map(|handle| card.get_crtc(*handle))
        .find(|info| info.mode().is_some())
        .ok_or("no crtc with a configured mode")?;
    let mode = crtc.mode().unwrap();
    let (width, height) = (u32::from(mode.size().0), u32::from(mode.size().1));
    println!(
        "using connector {:?}, crtc {:?} at {}x{}",
        connector.interface(),
        crtc.handle(),
        width,
        height
    );

    let mut device = Device::new(card)?;
    let output = device.create_output(crtc.handle())?;

    // A full-screen background plus staggered tiles on top of it.
    let mut layers = Vec::new();
    for index in 0..=TILE_COLORS.len() {
        let (x, y, w, h, color) = if index == 0 {
            (0, 0, width, height, 0xff20_2020)
        } else {
            let offset = (TILE_SIZE / 2) * index as u32;
            (offset, offset, TILE_SIZE, TILE_SIZE, TILE_COLORS[index - 1])
        };
        let fb = create_fb(device.drm(), w, h, color)?;

        let layer = device.create_layer(output)?;
        device.set_layer_property(layer, "FB_ID", u64::from(u32::from(fb)))?;
        device.set_layer_property(layer, "CRTC_X", u64::from(x))?;
        device.set_layer_property(layer, "CRTC_Y", u64::from(y))?;
        device.set_layer_property(layer, "CRTC_W", u64::from(w))?;
        device.set_layer_property(layer, "CRTC_H", u64::from(h))?;
        device.set_layer_property(layer, "SRC_X", 0)?;
        device.set_layer_property(layer, "SRC_Y", 0)?;
        device.set_layer_property(layer, "SRC_W", u64::from(w) << 16)?;
        device.set_layer_property(layer, "SRC_H", u64::from(h) << 16)?;
        device.set_layer_property(layer, "zpos", index as u64)?;
        layers.push(layer);
    }

    let mut req = AtomicRequest::new();
    device.apply(&mut req)?;
    device
        .drm()
        .atomic_commit(AtomicCommitFlags::NONBLOCK, req.build())?;

    for (index, layer) in layers.iter().enumerate() {
        match device.layer_plane(*layer)? {
            Some(plane) => println!("layer {index} on plane {:?}", plane),
            None => println!("layer {index} needs composition"),
        }
    }

    thread::sleep(Duration::from_secs(3));
    Ok(())
}
