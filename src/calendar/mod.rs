/// 历法模块
///
/// 农历提醒需要在公历与农历之间换算触发日期

pub mod lunar;

pub use lunar::{LunarCalendar, LunarDate, LunarMonth, DEFAULT_TIME_ZONE};
