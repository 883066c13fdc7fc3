// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/model/nms.rs - 按类别非极大值抑制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::model::{DetectedBox, Rect};

/// 计算两个矩形的 IoU
pub fn iou(a: &Rect, b: &Rect) -> f32 {
  let inter_w = (a.right.min(b.right) - a.left.max(b.left)).max(0.0);
  let inter_h = (a.bottom.min(b.bottom) - a.top.max(b.top)).max(0.0);
  let intersection = inter_w * inter_h;
  let union = a.area() + b.area() - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

/// 按类别做贪心 NMS
///
/// 同类别内按得分降序（稳定排序）扫描，与已保留框 IoU 严格大于阈值的框被抑制。
/// 类别按首次出现的顺序输出，类别内保持保留顺序。
pub fn nms_per_class(boxes: Vec<DetectedBox>, iou_threshold: f32) -> Vec<DetectedBox> {
  let mut groups: Vec<(u32, Vec<DetectedBox>)> = Vec::new();
  for item in boxes {
    match groups.iter_mut().find(|(class_id, _)| *class_id == item.class_id) {
      Some((_, group)) => group.push(item),
      None => groups.push((item.class_id, vec![item])),
    }
  }

  let mut kept = Vec::new();
  for (_, mut group) in groups {
    group.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut suppressed = vec![false; group.len()];
    for i in 0..group.len() {
      if suppressed[i] {
        continue;
      }
      for j in (i + 1)..group.len() {
        if !suppressed[j] && iou(&group[i].rect, &group[j].rect) > iou_threshold {
          suppressed[j] = true;
        }
      }
    }

    kept.extend(
      group
        .into_iter()
        .zip(suppressed)
        .filter_map(|(item, s)| (!s).then_some(item)),
    );
  }

  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(class_id: u32, score: f32, rect: [f32; 4]) -> DetectedBox {
    DetectedBox {
      class_id,
      score,
      rect: Rect::new(rect[0], rect[1], rect[2], rect[3]),
    }
  }

  #[test]
  fn iou_of_identical_and_disjoint() {
    let a = Rect::new(0.0, 0.0, 10.0, 10.0);
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    let b = Rect::new(20.0, 20.0, 30.0, 30.0);
    assert_eq!(iou(&a, &b), 0.0);
    let c = Rect::new(5.0, 0.0, 15.0, 10.0);
    assert!((iou(&a, &c) - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_empty_union_is_zero() {
    let a = Rect::new(1.0, 1.0, 1.0, 1.0);
    assert_eq!(iou(&a, &a), 0.0);
  }

  #[test]
  fn suppresses_within_class_only() {
    let boxes = vec![
      item(0, 0.6, [0.0, 0.0, 10.0, 10.0]),
      item(0, 0.9, [1.0, 0.0, 11.0, 10.0]),
      item(1, 0.5, [0.0, 0.0, 10.0, 10.0]),
      item(0, 0.7, [50.0, 50.0, 60.0, 60.0]),
    ];
    let kept = nms_per_class(boxes, 0.7);

    assert_eq!(kept.len(), 3);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].score, 0.7);
    assert_eq!(kept[2].class_id, 1);
  }

  #[test]
  fn iou_equal_to_threshold_is_kept() {
    // IoU = 50 / 150 = 1/3
    let boxes = vec![
      item(0, 0.9, [0.0, 0.0, 10.0, 10.0]),
      item(0, 0.8, [5.0, 0.0, 15.0, 10.0]),
    ];
    let threshold = iou(&boxes[0].rect, &boxes[1].rect);
    assert_eq!(nms_per_class(boxes.clone(), threshold).len(), 2);
    assert_eq!(nms_per_class(boxes, threshold - 1e-4).len(), 1);
  }

  #[test]
  fn suppressed_boxes_do_not_suppress_others() {
    // b 被 a 抑制，c 只与 b 重叠，应被保留
    let boxes = vec![
      item(0, 0.9, [0.0, 0.0, 10.0, 10.0]),
      item(0, 0.8, [2.0, 0.0, 12.0, 10.0]),
      item(0, 0.7, [8.0, 0.0, 18.0, 10.0]),
    ];
    let kept = nms_per_class(boxes, 0.5);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].score, 0.7);
  }

  #[test]
  fn equal_scores_keep_original_order() {
    let boxes = vec![
      item(0, 0.5, [0.0, 0.0, 10.0, 10.0]),
      item(0, 0.5, [0.5, 0.0, 10.5, 10.0]),
    ];
    let kept = nms_per_class(boxes, 0.7);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].rect.left, 0.0);
  }

  #[test]
  fn nms_is_idempotent() {
    let boxes: Vec<DetectedBox> = (0..20)
      .map(|i| {
        let x = (i % 7) as f32 * 3.0;
        let y = (i / 7) as f32 * 4.0;
        item(i % 2, 0.3 + (i as f32) * 0.03, [x, y, x + 10.0, y + 10.0])
      })
      .collect();

    let once = nms_per_class(boxes, 0.4);
    let twice = nms_per_class(once.clone(), 0.4);
    assert_eq!(once, twice);

    for a in &once {
      for b in &once {
        if a != b && a.class_id == b.class_id {
          assert!(iou(&a.rect, &b.rect) <= 0.4);
        }
      }
    }
  }

  #[test]
  fn empty_input() {
    assert!(nms_per_class(Vec::new(), 0.7).is_empty());
  }
}
