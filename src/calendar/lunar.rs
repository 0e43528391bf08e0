/// 阴阳历转换
///
/// 基于天文近似算法（朔日 + 太阳黄经）的东亚农历换算。
/// 所有"本地午夜"均按固定的 UTC 偏移（小时）计算。

use chrono::{Datelike, NaiveDate};
use std::f64::consts::PI;

/// 默认时区偏移（UTC+7）
pub const DEFAULT_TIME_ZONE: f64 = 7.0;

/// 儒略历 / 格里历切换点（1582-10-05）
const GREGORIAN_SWITCH_JDN: i64 = 2_299_161;

/// 朔望月长度（天）
const SYNODIC_MONTH: f64 = 29.530588853;

/// k = 0 时的朔日 JDN
const NEW_MOON_EPOCH: f64 = 2_415_021.076998695;

/// 农历日期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LunarDate {
    pub day: u32,
    pub month: u32,
    pub year: i32,
    pub is_leap: bool,
}

/// 一个朔望月（农历月）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LunarMonth {
    /// 朔望月序号 k
    pub index: i64,
    /// 初一的 JDN
    pub start_jdn: i64,
    /// 月长：29 或 30
    pub length: u32,
    pub month: u32,
    pub year: i32,
    pub is_leap: bool,
}

impl LunarMonth {
    /// 初一对应的公历日期
    pub fn start_date(&self) -> Option<NaiveDate> {
        jdn_to_naive(self.start_jdn)
    }

    /// 本月第 `day` 天对应的公历日期，超出月长返回 None
    pub fn date_of_day(&self, day: u32) -> Option<NaiveDate> {
        if day == 0 || day > self.length {
            return None;
        }
        jdn_to_naive(self.start_jdn + day as i64 - 1)
    }

    /// 本月最后一天对应的公历日期
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.date_of_day(self.length)
    }
}

/// 阴阳历转换器
#[derive(Debug, Clone, Copy)]
pub struct LunarCalendar {
    time_zone: f64,
}

impl Default for LunarCalendar {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_ZONE)
    }
}

impl LunarCalendar {
    pub fn new(time_zone: f64) -> Self {
        Self { time_zone }
    }

    pub fn time_zone(&self) -> f64 {
        self.time_zone
    }

    /// 公历 → 农历
    pub fn solar_to_lunar(&self, day: u32, month: u32, year: i32) -> LunarDate {
        let day_number = jd_from_date(day as i64, month as i64, year as i64);
        self.lunar_date_of_jdn(day_number)
    }

    /// 农历 → 公历
    ///
    /// `is_leap` 指定的月份不是当年闰月时返回 None。
    /// 1582 年以前的结果是儒略历日期。
    pub fn lunar_to_solar(
        &self,
        lunar_day: u32,
        lunar_month: u32,
        lunar_year: i32,
        is_leap: bool,
    ) -> Option<NaiveDate> {
        if !(1..=30).contains(&lunar_day) || !(1..=12).contains(&lunar_month) {
            return None;
        }

        let lunar_year = lunar_year as i64;
        let lunar_month = lunar_month as i64;
        let (a11, b11) = if lunar_month < 11 {
            (
                self.lunar_month_11(lunar_year - 1),
                self.lunar_month_11(lunar_year),
            )
        } else {
            (
                self.lunar_month_11(lunar_year),
                self.lunar_month_11(lunar_year + 1),
            )
        };

        let k = (0.5 + (a11 as f64 - NEW_MOON_EPOCH) / SYNODIC_MONTH).floor() as i64;
        let mut off = lunar_month - 11;
        if off < 0 {
            off += 12;
        }

        if b11 - a11 > 365 {
            let leap_off = self.leap_month_offset(a11);
            let mut leap_month = leap_off - 2;
            if leap_month < 0 {
                leap_month += 12;
            }
            if is_leap && lunar_month != leap_month {
                return None;
            } else if is_leap || off >= leap_off {
                off += 1;
            }
        } else if is_leap {
            return None;
        }

        let month_start = self.new_moon_day(k + off);
        jdn_to_naive(month_start + lunar_day as i64 - 1)
    }

    /// 包含给定公历日期的农历月
    pub fn month_containing(&self, date: NaiveDate) -> LunarMonth {
        let day_number = jd_from_date(date.day() as i64, date.month() as i64, date.year() as i64);
        let k = ((day_number as f64 - NEW_MOON_EPOCH) / SYNODIC_MONTH).floor() as i64;
        if self.new_moon_day(k + 1) <= day_number {
            self.lunation(k + 1)
        } else {
            self.lunation(k)
        }
    }

    /// 下一个农历月
    pub fn next_month(&self, month: &LunarMonth) -> LunarMonth {
        self.lunation(month.index + 1)
    }

    fn lunation(&self, k: i64) -> LunarMonth {
        let start_jdn = self.new_moon_day(k);
        let end_jdn = self.new_moon_day(k + 1);
        let label = self.lunar_date_of_jdn(start_jdn);
        LunarMonth {
            index: k,
            start_jdn,
            length: (end_jdn - start_jdn) as u32,
            month: label.month,
            year: label.year,
            is_leap: label.is_leap,
        }
    }

    fn lunar_date_of_jdn(&self, day_number: i64) -> LunarDate {
        let (_, _, solar_year) = jd_to_date(day_number);

        let k = ((day_number as f64 - NEW_MOON_EPOCH) / SYNODIC_MONTH).floor() as i64;
        let mut month_start = self.new_moon_day(k + 1);
        if month_start > day_number {
            month_start = self.new_moon_day(k);
        }

        let mut a11 = self.lunar_month_11(solar_year);
        let mut b11 = a11;
        let mut lunar_year;
        if a11 >= month_start {
            lunar_year = solar_year;
            a11 = self.lunar_month_11(solar_year - 1);
        } else {
            lunar_year = solar_year + 1;
            b11 = self.lunar_month_11(solar_year + 1);
        }

        let lunar_day = day_number - month_start + 1;
        let diff = ((month_start - a11) as f64 / 29.0).floor() as i64;
        let mut is_leap = false;
        let mut lunar_month = diff + 11;

        if b11 - a11 > 365 {
            let leap_month_diff = self.leap_month_offset(a11);
            if diff >= leap_month_diff {
                lunar_month = diff + 10;
                if diff == leap_month_diff {
                    is_leap = true;
                }
            }
        }
        if lunar_month > 12 {
            lunar_month -= 12;
        }
        if lunar_month >= 11 && diff < 4 {
            lunar_year -= 1;
        }

        LunarDate {
            day: lunar_day as u32,
            month: lunar_month as u32,
            year: lunar_year as i32,
            is_leap,
        }
    }

    /// 第 k 个朔日所在的本地日 JDN
    fn new_moon_day(&self, k: i64) -> i64 {
        (new_moon(k) + 0.5 + self.time_zone / 24.0).floor() as i64
    }

    /// 本地午夜的太阳黄经所在区段（0..12）
    fn sun_longitude_sector(&self, day_number: i64) -> i64 {
        let longitude = sun_longitude(day_number as f64 - 0.5 - self.time_zone / 24.0);
        (longitude / PI * 6.0).floor() as i64
    }

    /// 冬至所在农历十一月的初一
    fn lunar_month_11(&self, year: i64) -> i64 {
        let off = jd_from_date(31, 12, year) - 2_415_021;
        let k = (off as f64 / SYNODIC_MONTH).floor() as i64;
        let new_moon = self.new_moon_day(k);
        if self.sun_longitude_sector(new_moon) >= 9 {
            self.new_moon_day(k - 1)
        } else {
            new_moon
        }
    }

    /// 闰月相对于十一月的偏移
    fn leap_month_offset(&self, a11: i64) -> i64 {
        let k = ((a11 as f64 - NEW_MOON_EPOCH) / SYNODIC_MONTH + 0.5).floor() as i64;
        let mut i = 1;
        let mut arc = self.sun_longitude_sector(self.new_moon_day(k + i));
        loop {
            let last = arc;
            i += 1;
            arc = self.sun_longitude_sector(self.new_moon_day(k + i));
            if arc == last || i >= 14 {
                break;
            }
        }
        i - 1
    }
}

/// 公历日期 → 儒略日数
pub fn jd_from_date(day: i64, month: i64, year: i64) -> i64 {
    let a = (14 - month) / 12;
    let y = year + 4800 - a;
    let m = month + 12 * a - 3;
    let jd = day + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045;
    if jd < GREGORIAN_SWITCH_JDN {
        day + (153 * m + 2) / 5 + 365 * y + y / 4 - 32083
    } else {
        jd
    }
}

/// 儒略日数 → (日, 月, 年)
pub fn jd_to_date(jd: i64) -> (i64, i64, i64) {
    let (b, c) = if jd > GREGORIAN_SWITCH_JDN - 1 {
        let a = jd + 32044;
        let b = (4 * a + 3) / 146097;
        (b, a - (b * 146097) / 4)
    } else {
        (0, jd + 32082)
    };
    let d = (4 * c + 3) / 1461;
    let e = c - (1461 * d) / 4;
    let m = (5 * e + 2) / 153;
    let day = e - (153 * m + 2) / 5 + 1;
    let month = m + 3 - 12 * (m / 10);
    let year = b * 100 + d - 4800 + m / 10;
    (day, month, year)
}

fn jdn_to_naive(jd: i64) -> Option<NaiveDate> {
    let (day, month, year) = jd_to_date(jd);
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
}

/// 第 k 个朔日的儒略日（含小数，UT）
fn new_moon(k: i64) -> f64 {
    let k = k as f64;
    let t = k / 1236.85;
    let t2 = t * t;
    let t3 = t2 * t;
    let dr = PI / 180.0;

    let mut jd1 = 2415020.75933 + 29.53058868 * k + 0.0001178 * t2 - 0.000000155 * t3;
    jd1 += 0.00033 * ((166.56 + 132.87 * t - 0.009173 * t2) * dr).sin();

    let m = 359.2242 + 29.10535608 * k - 0.0000333 * t2 - 0.00000347 * t3;
    let mpr = 306.0253 + 385.81691806 * k + 0.0107306 * t2 + 0.00001236 * t3;
    let f = 21.2964 + 390.67050646 * k - 0.0016528 * t2 - 0.00000239 * t3;

    let mut c1 = (0.1734 - 0.000393 * t) * (m * dr).sin() + 0.0021 * (2.0 * dr * m).sin();
    c1 = c1 - 0.4068 * (mpr * dr).sin() + 0.0161 * (dr * 2.0 * mpr).sin();
    c1 -= 0.0004 * (dr * 3.0 * mpr).sin();
    c1 = c1 + 0.0104 * (dr * 2.0 * f).sin() - 0.0051 * (dr * (m + mpr)).sin();
    c1 = c1 - 0.0074 * (dr * (m - mpr)).sin() + 0.0004 * (dr * (2.0 * f + m)).sin();
    c1 = c1 - 0.0004 * (dr * (2.0 * f - m)).sin() - 0.0006 * (dr * (2.0 * f + mpr)).sin();
    c1 = c1 + 0.0010 * (dr * (2.0 * f - mpr)).sin() + 0.0005 * (dr * (2.0 * mpr + m)).sin();

    let delta_t = if t < -11.0 {
        0.001 + 0.000839 * t + 0.0002261 * t2 - 0.00000845 * t3 - 0.000000081 * t * t3
    } else {
        -0.000278 + 0.000265 * t + 0.000262 * t2
    };

    jd1 + c1 - delta_t
}

/// 太阳黄经（弧度，归一化到 [0, 2π)）
fn sun_longitude(jdn: f64) -> f64 {
    let t = (jdn - 2451545.0) / 36525.0;
    let t2 = t * t;
    let dr = PI / 180.0;

    let m = 357.52910 + 35999.05030 * t - 0.0001559 * t2 - 0.00000048 * t * t2;
    let l0 = 280.46645 + 36000.76983 * t + 0.0003032 * t2;
    let mut dl = (1.914600 - 0.004817 * t - 0.000014 * t2) * (dr * m).sin();
    dl += (0.019993 - 0.000101 * t) * (dr * 2.0 * m).sin() + 0.000290 * (dr * 3.0 * m).sin();

    let l = (l0 + dl) * dr;
    l - PI * 2.0 * (l / (PI * 2.0)).floor()
}
