//! # Si446x Command Set and Property Map
//!
//! Command opcodes, property addresses and the baseline register table
//! written on power-up.

/// Power up the chip and select the clock source
pub const CMD_POWER_UP: u8 = 0x02;

/// Set one or more consecutive properties
pub const CMD_SET_PROPERTY: u8 = 0x11;

/// GPIO pin function mapping
pub const CMD_GPIO_PIN_CFG: u8 = 0x13;

/// ADC conversion (temperature, battery, GPIO)
pub const CMD_GET_ADC_READING: u8 = 0x14;

/// FIFO status and reset
pub const CMD_FIFO_INFO: u8 = 0x15;

/// Enter TX state
pub const CMD_START_TX: u8 = 0x31;

/// Enter RX state
pub const CMD_START_RX: u8 = 0x32;

/// Current state and channel
pub const CMD_REQUEST_DEVICE_STATE: u8 = 0x33;

/// Manual state change
pub const CMD_CHANGE_STATE: u8 = 0x34;

/// Read command buffer (clear-to-send poll and response fetch)
pub const CMD_READ_CMD_BUFF: u8 = 0x44;

/// Write bytes to the TX FIFO
pub const CMD_WRITE_TX_FIFO: u8 = 0x66;

/// Value of the second byte of a command buffer read when the chip is ready
pub const CTS_READY: u8 = 0xFF;

/// FIFO_INFO argument: reset the TX FIFO
pub const FIFO_RESET_TX: u8 = 0x01;

/// GET_ADC_READING argument: temperature only
pub const ADC_TEMPERATURE: u8 = 0x10;

/// Combined TX/RX FIFO size in bytes
pub const FIFO_SIZE: usize = 64;

/// Largest length START_TX can carry
pub const MAX_TX_LENGTH: usize = 0x1FFF;

/// GPIO0 idle, GPIO1 raw RX data, GPIO2 RX state, GPIO3 TX state,
/// NIRQ carries CCA, SDO unchanged
pub const GPIO_PIN_CFG: [u8; 8] = [CMD_GPIO_PIN_CFG, 0x00, 0x15, 0x21, 0x20, 0x1B, 0x0B, 0x00];

/// Synthesizer select bit OR-ed into the band code
pub const CLKGEN_SY_SEL: u8 = 0x08;

pub const GLOBAL_XO_TUNE: u16 = 0x0000;
pub const GLOBAL_CLK_CFG: u16 = 0x0001;
pub const GLOBAL_CONFIG: u16 = 0x0003;
pub const INT_CTL_ENABLE: u16 = 0x0100;
pub const FRR_CTL_A_MODE: u16 = 0x0200;
pub const FRR_CTL_B_MODE: u16 = 0x0201;
pub const FRR_CTL_C_MODE: u16 = 0x0202;
pub const FRR_CTL_D_MODE: u16 = 0x0203;
pub const PREAMBLE_TX_LENGTH: u16 = 0x1000;
pub const PREAMBLE_CONFIG_STD_1: u16 = 0x1001;
pub const SYNC_CONFIG: u16 = 0x1100;
pub const PKT_CONFIG1: u16 = 0x1206;

pub const MODEM_MOD_TYPE: u16 = 0x2000;
pub const MODEM_MAP_CONTROL: u16 = 0x2001;
pub const MODEM_DSM_CTRL: u16 = 0x2002;
pub const MODEM_DATA_RATE: u16 = 0x2003;
pub const MODEM_TX_NCO_MODE: u16 = 0x2006;
pub const MODEM_FREQ_DEV: u16 = 0x200A;
/// TX filter coefficient 0; coefficients 1..8 sit at descending addresses
pub const MODEM_TX_FILTER_COEFF_0: u16 = 0x2017;
pub const MODEM_TX_RAMP_DELAY: u16 = 0x2018;
pub const MODEM_MDM_CTRL: u16 = 0x2019;
pub const MODEM_IF_CONTROL: u16 = 0x201A;
pub const MODEM_IF_FREQ: u16 = 0x201B;
pub const MODEM_DECIMATION_CFG1: u16 = 0x201E;
pub const MODEM_DECIMATION_CFG0: u16 = 0x201F;
pub const MODEM_BCR_OSR: u16 = 0x2022;
pub const MODEM_BCR_NCO_OFFSET: u16 = 0x2024;
pub const MODEM_BCR_GAIN: u16 = 0x2027;
pub const MODEM_BCR_GEAR: u16 = 0x2029;
pub const MODEM_BCR_MISC1: u16 = 0x202A;
pub const MODEM_AFC_GEAR: u16 = 0x202C;
pub const MODEM_AFC_WAIT: u16 = 0x202D;
pub const MODEM_AFC_GAIN: u16 = 0x202E;
pub const MODEM_AFC_LIMITER: u16 = 0x2030;
pub const MODEM_AFC_MISC: u16 = 0x2032;
pub const MODEM_AGC_CONTROL: u16 = 0x2035;
pub const MODEM_AGC_WINDOW_SIZE: u16 = 0x2038;
pub const MODEM_AGC_RFPD_DECAY: u16 = 0x2039;
pub const MODEM_AGC_IFPD_DECAY: u16 = 0x203A;
pub const MODEM_FSK4_GAIN1: u16 = 0x203B;
pub const MODEM_FSK4_GAIN0: u16 = 0x203C;
pub const MODEM_FSK4_TH: u16 = 0x203D;
pub const MODEM_FSK4_MAP: u16 = 0x203F;
pub const MODEM_OOK_PDTC: u16 = 0x2040;
pub const MODEM_OOK_CNT1: u16 = 0x2042;
pub const MODEM_OOK_MISC: u16 = 0x2043;
pub const MODEM_RAW_SEARCH: u16 = 0x2044;
pub const MODEM_RAW_CONTROL: u16 = 0x2045;
pub const MODEM_RAW_EYE: u16 = 0x2046;
pub const MODEM_ANT_DIV_MODE: u16 = 0x2048;
pub const MODEM_ANT_DIV_CONTROL: u16 = 0x2049;
pub const MODEM_RSSI_THRESH: u16 = 0x204A;
pub const MODEM_RSSI_CONTROL: u16 = 0x204C;
pub const MODEM_RSSI_COMP: u16 = 0x204E;
pub const MODEM_CLKGEN_BAND: u16 = 0x2051;
/// First RX1 channel filter coefficient (COE13); the set is contiguous
pub const MODEM_CHFLT_RX1_BASE: u16 = 0x2100;

pub const PA_PWR_LVL: u16 = 0x2201;
pub const PA_TC: u16 = 0x2203;

pub const FREQ_CONTROL_INTE: u16 = 0x4000;
pub const FREQ_CONTROL_FRAC: u16 = 0x4001;
pub const FREQ_CONTROL_CHANNEL_STEP_SIZE: u16 = 0x4004;
pub const FREQ_CONTROL_W_SIZE: u16 = 0x4006;
pub const FREQ_CONTROL_VCOCNT_RX_ADJ: u16 = 0x4007;

/// MODEM_MOD_TYPE: 2FSK, TX data from FIFO (upsampled AFSK)
pub const MOD_TYPE_AFSK_TX: u8 = 0x02;
/// MODEM_MOD_TYPE: 2GFSK, TX data from FIFO
pub const MOD_TYPE_FSK_TX: u8 = 0x03;
/// MODEM_MOD_TYPE: 2FSK, direct asynchronous mode for the software demodulator
pub const MOD_TYPE_AFSK_RX: u8 = 0x0A;

/// MODEM_DATA_RATE for the 13.2 kHz AFSK playback rate
pub const AFSK_DATA_RATE: [u8; 3] = [0x00, 0x33, 0x90];

/// TX filter for upsampled AFSK, coefficient 0 first
pub const AFSK_TX_FILTER: [u8; 9] = [0x81, 0x9F, 0xC4, 0xEE, 0x18, 0x3E, 0x5C, 0x70, 0x76];

/// Default Gaussian TX filter for 2GFSK, coefficient 0 first
pub const FSK_TX_FILTER: [u8; 9] = [0x01, 0x03, 0x08, 0x11, 0x21, 0x36, 0x4D, 0x60, 0x67];

/// RX1 channel filter for the AFSK receive path, COE13 through COEM3
pub const AFSK_RX_CHANNEL_FILTER: [u8; 18] = [
    0xFF, 0xC4, 0x30, 0x7F, 0x5F, 0xB5, 0xB8, 0xDE, 0x05, 0x17, 0x16, 0x0C, 0x03, 0x00, 0x15,
    0xFF, 0x00, 0x00,
];

/// Baseline properties written once after power-up
pub const INIT_PROPERTIES: &[(u16, &[u8])] = &[
    (FRR_CTL_A_MODE, &[0x00]),
    (FRR_CTL_B_MODE, &[0x00]),
    (FRR_CTL_C_MODE, &[0x00]),
    (FRR_CTL_D_MODE, &[0x00]),
    (INT_CTL_ENABLE, &[0x00]),
    // Combined 64 byte TX/RX FIFO
    (GLOBAL_CONFIG, &[0x70]),
];

/// Modem baseline written after the FIFO reset of the power-up sequence
pub const MODEM_BASELINE: &[(u16, &[u8])] = &[
    (PREAMBLE_TX_LENGTH, &[0x00]),
    (SYNC_CONFIG, &[0x80]),
    (GLOBAL_CLK_CFG, &[0x00]),
    (MODEM_RSSI_CONTROL, &[0x00]),
    (PREAMBLE_CONFIG_STD_1, &[0x14]),
    (PKT_CONFIG1, &[0x41]),
    (MODEM_MAP_CONTROL, &[0x00]),
    (MODEM_DSM_CTRL, &[0x07]),
    (MODEM_CLKGEN_BAND, &[0x0D]),
    (MODEM_FREQ_DEV, &[0x00, 0x00, 0x79]),
    (MODEM_TX_RAMP_DELAY, &[0x01]),
    (PA_TC, &[0x3D]),
    (FREQ_CONTROL_INTE, &[0x41]),
    (FREQ_CONTROL_FRAC, &[0x0B, 0xB1, 0x3B]),
    (FREQ_CONTROL_CHANNEL_STEP_SIZE, &[0x0B, 0xD1]),
    (FREQ_CONTROL_W_SIZE, &[0x20]),
    (FREQ_CONTROL_VCOCNT_RX_ADJ, &[0xFA]),
    (MODEM_MDM_CTRL, &[0x80]),
    (MODEM_IF_CONTROL, &[0x08]),
    (MODEM_IF_FREQ, &[0x02, 0x80, 0x00]),
    (MODEM_DECIMATION_CFG1, &[0x70]),
    (MODEM_DECIMATION_CFG0, &[0x10]),
    (MODEM_BCR_OSR, &[0x01, 0xC3]),
    (MODEM_BCR_NCO_OFFSET, &[0x01, 0x22, 0x60]),
    (MODEM_BCR_GAIN, &[0x00, 0x91]),
    (MODEM_BCR_GEAR, &[0x00]),
    (MODEM_BCR_MISC1, &[0xC2]),
    (MODEM_AFC_GEAR, &[0x54]),
    (MODEM_AFC_WAIT, &[0x36]),
    (MODEM_AFC_GAIN, &[0x80, 0xAB]),
    (MODEM_AFC_LIMITER, &[0x02, 0x50]),
    (MODEM_AFC_MISC, &[0x80]),
    (MODEM_AGC_CONTROL, &[0xE2]),
    (MODEM_AGC_WINDOW_SIZE, &[0x11]),
    (MODEM_AGC_RFPD_DECAY, &[0x63]),
    (MODEM_AGC_IFPD_DECAY, &[0x63]),
    (MODEM_FSK4_GAIN1, &[0x00]),
    (MODEM_FSK4_GAIN0, &[0x02]),
    (MODEM_FSK4_TH, &[0x35, 0x55]),
    (MODEM_FSK4_MAP, &[0x00]),
    (MODEM_OOK_PDTC, &[0x2A]),
    (MODEM_OOK_CNT1, &[0x85]),
    (MODEM_OOK_MISC, &[0x23]),
    (MODEM_RAW_SEARCH, &[0xD6]),
    (MODEM_RAW_CONTROL, &[0x8F]),
    (MODEM_RAW_EYE, &[0x00, 0x3B]),
    (MODEM_ANT_DIV_MODE, &[0x01]),
    (MODEM_ANT_DIV_CONTROL, &[0x80]),
    (MODEM_RSSI_COMP, &[0x40]),
];

/// Build a SET_PROPERTY command for consecutive properties starting at `property`
///
/// # Examples
///
/// ```
/// use aprs_radio::si446x::registers::{property_command, PA_PWR_LVL};
///
/// assert_eq!(property_command(PA_PWR_LVL, &[0x7F]), vec![0x11, 0x22, 0x01, 0x01, 0x7F]);
/// ```
pub fn property_command(property: u16, values: &[u8]) -> Vec<u8> {
    let mut cmd = Vec::with_capacity(4 + values.len());
    cmd.push(CMD_SET_PROPERTY);
    cmd.push((property >> 8) as u8);
    cmd.push(values.len() as u8);
    cmd.push((property & 0xFF) as u8);
    cmd.extend_from_slice(values);
    cmd
}
