// Field names follow Wireshark's USB dissector as exported in PDML.
// https://www.wireshark.org/docs/dfref/u/usb.html

pub mod iso;
